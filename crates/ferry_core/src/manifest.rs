//! Fetching, validating and republishing image manifests.
use bytes::Bytes;
use oci_spec::image::{Descriptor, ImageManifest, MediaType};

use crate::coordinator::MigrationReport;
use crate::errors::{Error, Phase, Result};
use crate::registry::RegistryClient;
use crate::OciDigest;

/// The only manifest schema version this crate replicates.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 2;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Media types sent in the `Accept` header when fetching a manifest.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] = &[DOCKER_MANIFEST_V2, OCI_IMAGE_MANIFEST];

/// An image manifest as fetched from a registry.
///
/// Keeps the bytes the registry served alongside the parsed form so that republishing it produces
/// a manifest with the same digest at the destination.
#[derive(Clone, Debug)]
pub struct Manifest {
    spec: ImageManifest,
    media_type: String,
    raw: Bytes,
}

impl Manifest {
    /// Parse manifest bytes served with the given `Content-Type`, if any.
    pub fn from_bytes(content_type: Option<&str>, raw: Bytes) -> Result<Manifest> {
        let value: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::InvalidManifest(format!("malformed manifest json: {e}")))?;

        let media_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_string())
            .filter(|ct| !ct.is_empty() && ct != "application/json")
            .or_else(|| value["mediaType"].as_str().map(String::from))
            .unwrap_or_else(|| OCI_IMAGE_MANIFEST.to_string());

        if media_type == DOCKER_MANIFEST_LIST_V2 || media_type == OCI_IMAGE_INDEX {
            return Err(Error::SchemaUnsupported(format!(
                "multi-platform manifests ({media_type}) are not supported"
            )));
        }

        if let Some(version) = value["schemaVersion"].as_u64() {
            if version != SUPPORTED_SCHEMA_VERSION as u64 {
                return Err(Error::InvalidManifest(format!(
                    "schemaVersion {version} is not supported"
                )));
            }
        }

        let spec: ImageManifest = serde_json::from_value(value)
            .map_err(|e| Error::InvalidManifest(format!("not an image manifest: {e}")))?;

        Ok(Manifest {
            spec,
            media_type,
            raw,
        })
    }

    /// Wrap an already constructed manifest, serializing it to obtain its bytes.
    pub fn from_spec(spec: ImageManifest) -> Result<Manifest> {
        let raw = Bytes::from(serde_json::to_vec(&spec)?);
        let media_type = spec
            .media_type()
            .as_ref()
            .map(|mt| mt.to_string())
            .unwrap_or_else(|| MediaType::ImageManifest.to_string());
        Ok(Manifest {
            spec,
            media_type,
            raw,
        })
    }

    #[inline]
    pub fn spec(&self) -> &ImageManifest {
        &self.spec
    }

    #[inline]
    pub fn schema_version(&self) -> u32 {
        self.spec.schema_version().to_owned()
    }

    #[inline]
    pub fn config(&self) -> &Descriptor {
        self.spec.config()
    }

    #[inline]
    pub fn layers(&self) -> &[Descriptor] {
        self.spec.layers()
    }

    #[inline]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    #[inline]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Digest of the manifest bytes.
    pub fn digest(&self) -> OciDigest {
        OciDigest::from(self.raw.as_ref())
    }

    /// Check the invariants required before any blob is transferred and return the blobs the
    /// manifest references.
    pub fn validate(&self) -> Result<ImageBlobs> {
        let version = self.schema_version();
        if version != SUPPORTED_SCHEMA_VERSION {
            return Err(Error::InvalidManifest(format!(
                "schemaVersion {version} is not supported"
            )));
        }

        if self.config().digest().is_empty() {
            return Err(Error::InvalidManifest(
                "config descriptor has an empty digest".to_string(),
            ));
        }
        let config = BlobDescriptor::try_from(self.config())?;

        if self.layers().is_empty() {
            return Err(Error::InvalidManifest(
                "manifest must reference at least one layer".to_string(),
            ));
        }
        let layers = self
            .layers()
            .iter()
            .map(BlobDescriptor::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(ImageBlobs { config, layers })
    }
}

/// The identity of one blob referenced by a manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub digest: OciDigest,
    pub media_type: String,
    pub size: Option<u64>,
}

impl TryFrom<&Descriptor> for BlobDescriptor {
    type Error = Error;

    fn try_from(d: &Descriptor) -> Result<Self> {
        let digest = OciDigest::try_from(d.digest().as_str())
            .map_err(|e| Error::InvalidManifest(format!("descriptor digest: {e}")))?;
        let size = d.size().to_owned();
        let size = u64::try_from(size)
            .map_err(|_| Error::InvalidManifest(format!("negative size for {digest}")))?;
        Ok(BlobDescriptor {
            digest,
            media_type: d.media_type().to_string(),
            size: Some(size),
        })
    }
}

/// Blobs referenced by a validated manifest, config first.
#[derive(Clone, Debug)]
pub struct ImageBlobs {
    pub config: BlobDescriptor,
    pub layers: Vec<BlobDescriptor>,
}

impl ImageBlobs {
    /// Config followed by layers in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &BlobDescriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// Fetches and validates manifests from the source and republishes them at the destination once
/// every blob they reference is known to be there.
#[derive(Clone)]
pub struct ManifestAssembler<S: RegistryClient, D: RegistryClient> {
    source: S,
    destination: D,
}

impl<S: RegistryClient, D: RegistryClient> ManifestAssembler<S, D> {
    pub fn new(source: S, destination: D) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Fetch the manifest tagged `tag` from the source and validate it. Nothing is transferred
    /// for a manifest that fails validation.
    pub async fn fetch(&self, repository: &str, tag: &str) -> Result<(Manifest, ImageBlobs)> {
        let manifest = self
            .source
            .fetch_manifest(repository, tag)
            .await
            .map_err(Into::<Error>::into)
            .map_err(|e| e.context(Phase::FetchingManifest, repository, tag))?;

        tracing::debug!(
            "fetched {} manifest {} for {repository}:{tag}",
            manifest.media_type(),
            manifest.digest(),
        );

        let blobs = manifest
            .validate()
            .map_err(|e| e.context(Phase::FetchingManifest, repository, tag))?;
        Ok((manifest, blobs))
    }

    /// Publish `manifest` at the destination under `tag`.
    ///
    /// Refuses to publish unless `report` records a successful migration for every blob in
    /// `blobs`, so a destination manifest never references a blob that is not there.
    pub async fn publish(
        &self,
        repository: &str,
        tag: &str,
        manifest: &Manifest,
        blobs: &ImageBlobs,
        report: &MigrationReport,
    ) -> Result<()> {
        if let Some(missing) = blobs.iter().find(|b| !report.contains(&b.digest)) {
            return Err(Error::VerificationFailed {
                repository: repository.to_string(),
                digest: missing.digest.to_string(),
            }
            .context(Phase::PublishingManifest, repository, tag));
        }

        self.destination
            .publish_manifest(repository, tag, manifest)
            .await
            .map_err(Into::<Error>::into)
            .map_err(|e| e.context(Phase::PublishingManifest, repository, tag))?;

        tracing::info!(
            "published manifest {} as {repository}:{tag}",
            manifest.digest()
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use oci_spec::image::{DescriptorBuilder, ImageManifestBuilder};
    use rstest::*;

    use super::*;

    fn descriptor(media_type: MediaType, digest: &str) -> Descriptor {
        DescriptorBuilder::default()
            .media_type(media_type)
            .digest(digest)
            .size(32)
            .build()
            .expect("must set all required fields for descriptor")
    }

    fn manifest(schema_version: u32, config: &str, layers: &[&str]) -> Manifest {
        let spec = ImageManifestBuilder::default()
            .schema_version(schema_version)
            .media_type(MediaType::ImageManifest)
            .config(descriptor(MediaType::ImageConfig, config))
            .layers(
                layers
                    .iter()
                    .map(|l| descriptor(MediaType::ImageLayerGzip, l))
                    .collect::<Vec<_>>(),
            )
            .build()
            .expect("must set all required fields for image manifest");
        Manifest::from_spec(spec).expect("manifest should serialize")
    }

    #[rstest]
    #[case::valid(2, "sha256:aaa", &["sha256:bbb", "sha256:ccc"], None)]
    #[case::old_schema(1, "sha256:aaa", &["sha256:bbb"], Some("schemaVersion 1 is not supported"))]
    #[case::empty_config(2, "", &["sha256:bbb"], Some("config descriptor has an empty digest"))]
    #[case::no_layers(2, "sha256:aaa", &[], Some("manifest must reference at least one layer"))]
    #[case::bad_layer_digest(2, "sha256:aaa", &["md5:bbb"], Some("descriptor digest: invalid digest: md5:bbb"))]
    fn validate(
        #[case] schema_version: u32,
        #[case] config: &str,
        #[case] layers: &[&str],
        #[case] expected_err: Option<&str>,
    ) {
        let m = manifest(schema_version, config, layers);
        match (m.validate(), expected_err) {
            (Ok(blobs), None) => {
                assert_eq!(blobs.config.digest.to_string(), config);
                let digests: Vec<String> =
                    blobs.layers.iter().map(|b| b.digest.to_string()).collect();
                assert_eq!(digests, layers);
            }
            (Err(Error::InvalidManifest(msg)), Some(expected)) => assert_eq!(msg, expected),
            (actual, expected) => panic!("expected {expected:?}, got {actual:?}"),
        }
    }

    #[test]
    fn docker_manifest_round_trips_its_bytes() {
        let raw = Bytes::from_static(
            br#"{
   "schemaVersion": 2,
   "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
   "config": {
      "mediaType": "application/vnd.docker.container.image.v1+json",
      "size": 1469,
      "digest": "sha256:aaa"
   },
   "layers": [
      {
         "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
         "size": 2818413,
         "digest": "sha256:bbb"
      }
   ]
}"#,
        );
        let m = Manifest::from_bytes(Some(DOCKER_MANIFEST_V2), raw.clone())
            .expect("docker v2 manifest should parse");
        assert_eq!(m.media_type(), DOCKER_MANIFEST_V2);
        assert_eq!(m.raw(), &raw);
        assert_eq!(m.digest(), OciDigest::from(raw.as_ref()));

        let blobs = m.validate().expect("manifest should be valid");
        assert_eq!(blobs.config.size, Some(1469));
        assert_eq!(
            blobs.layers[0].media_type,
            "application/vnd.docker.image.rootfs.diff.tar.gzip"
        );
    }

    #[rstest]
    #[case::docker_list(Some(DOCKER_MANIFEST_LIST_V2), r#"{"schemaVersion":2,"manifests":[]}"#)]
    #[case::oci_index(None, r#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[]}"#)]
    fn manifest_lists_are_unsupported(#[case] content_type: Option<&str>, #[case] body: &str) {
        let result = Manifest::from_bytes(content_type, Bytes::from(body.to_string()));
        assert!(matches!(result, Err(Error::SchemaUnsupported(_))));
    }

    #[test]
    fn schema_one_is_invalid() {
        let body = r#"{"schemaVersion":1,"name":"library/alpine","tag":"latest","fsLayers":[]}"#;
        let result = Manifest::from_bytes(None, Bytes::from(body.to_string()));
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }
}

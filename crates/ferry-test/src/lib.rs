use bytes::Bytes;
use derive_builder::Builder;
use oci_spec::image::{Descriptor, DescriptorBuilder, ImageManifestBuilder, MediaType};

use ferry_core::{Manifest, OciDigest};

mod errors;
pub use errors::{Error, Result};

pub mod loader;
pub use loader::RepositoryLoader;

pub mod memory;
pub use memory::{Calls, Fault, MemoryRegistry};

pub mod testdata;


const DEFAULT_CONFIG: &str = r#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers","diff_ids":[]}}"#;

#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", build_fn(skip))]
pub struct Layer {
    #[builder(setter(into))]
    pub data: Bytes,

    #[builder(setter(skip))]
    pub descriptor: Descriptor,
}

impl LayerBuilder {
    pub fn build(self) -> Result<Layer> {
        let data = self.data.ok_or(Error::LayerBuilderError(
            "must include data to construct Layer".to_string(),
        ))?;
        let descriptor = descriptor(MediaType::ImageLayerGzip, &data)?;
        Ok(Layer { data, descriptor })
    }
}

impl Layer {
    pub fn digest(&self) -> OciDigest {
        OciDigest::from(self.data.as_ref())
    }
}

impl TryFrom<&str> for Layer {
    type Error = Error;

    fn try_from(s: &str) -> Result<Layer> {
        LayerBuilder::default().data(s.to_string()).build()
    }
}

#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", build_fn(skip))]
pub struct Image {
    #[builder(setter(into))]
    pub config: Bytes,
    pub layers: Vec<Layer>,
    pub schema_version: u32,

    #[builder(setter(skip))]
    pub config_descriptor: Descriptor,
    #[builder(setter(skip))]
    pub manifest: Manifest,
}

impl ImageBuilder {
    pub fn build(self) -> Result<Image> {
        let config = self
            .config
            .unwrap_or_else(|| Bytes::from_static(DEFAULT_CONFIG.as_bytes()));
        let config_descriptor = descriptor(MediaType::ImageConfig, &config)?;

        let layers = self.layers.unwrap_or_default();
        let layer_descriptors = layers
            .iter()
            .map(|l| l.descriptor.clone())
            .collect::<Vec<Descriptor>>();

        let spec = ImageManifestBuilder::default()
            .schema_version(self.schema_version.unwrap_or(2))
            .media_type(MediaType::ImageManifest)
            .config(config_descriptor.clone())
            .layers(layer_descriptors)
            .build()
            .map_err(|e| Error::ImageBuilderError(e.to_string()))?;
        let manifest = Manifest::from_spec(spec)?;

        Ok(Image {
            config,
            layers,
            schema_version: manifest.schema_version(),
            config_descriptor,
            manifest,
        })
    }
}

impl Image {
    pub fn config_digest(&self) -> OciDigest {
        OciDigest::from(self.config.as_ref())
    }

    /// Config digest followed by layer digests in manifest order.
    pub fn digests(&self) -> Vec<OciDigest> {
        std::iter::once(self.config_digest())
            .chain(self.layers.iter().map(Layer::digest))
            .collect()
    }

    /// Every blob of the image paired with its bytes.
    pub fn blobs(&self) -> Vec<(OciDigest, Bytes)> {
        std::iter::once((self.config_digest(), self.config.clone()))
            .chain(self.layers.iter().map(|l| (l.digest(), l.data.clone())))
            .collect()
    }
}

fn descriptor(media_type: MediaType, data: &Bytes) -> Result<Descriptor> {
    DescriptorBuilder::default()
        .media_type(media_type)
        .digest(OciDigest::from(data.as_ref()).to_string())
        .size(data.len() as i64)
        .build()
        .map_err(|e| Error::LayerBuilderError(e.to_string()))
}

use lazy_static::lazy_static;
use serde::Deserialize;

use super::errors::Result;
use super::{Image, ImageBuilder, Layer};

lazy_static! {
    /// Tagged images sharing some of their layers.
    pub static ref BASIC_IMAGES: Vec<(String, Image)> = initialize_basic_images();
}

#[derive(Deserialize)]
struct ImageFixture {
    tag: String,
    #[serde(default)]
    config: Option<String>,
    layers: Vec<String>,
}

impl ImageFixture {
    fn build(self) -> Result<(String, Image)> {
        let layers = self
            .layers
            .iter()
            .map(|l| Layer::try_from(l.as_str()))
            .collect::<Result<Vec<_>>>()?;
        let mut builder = ImageBuilder::default().layers(layers);
        if let Some(config) = self.config {
            builder = builder.config(config);
        }
        Ok((self.tag, builder.build()?))
    }
}

/// Build an image whose layers hold the given contents.
pub fn image_with_layers(layers: &[&str]) -> Image {
    let layers = layers
        .iter()
        .map(|l| Layer::try_from(*l).expect("layer data should build"))
        .collect::<Vec<_>>();
    ImageBuilder::default()
        .layers(layers)
        .build()
        .expect("expect valid image")
}

fn parse_images(yaml: &str) -> Result<Vec<(String, Image)>> {
    let fixtures: Vec<ImageFixture> = serde_yaml::from_str(yaml)?;
    fixtures.into_iter().map(ImageFixture::build).collect()
}

fn initialize_basic_images() -> Vec<(String, Image)> {
    parse_images(
        r#"
- tag: meow
  layers:
  - "layer 1"
  - "layer 2"
  - "layer 3"
- tag: purr
  config: '{"architecture":"arm64","os":"linux","rootfs":{"type":"layers","diff_ids":[]}}'
  layers:
  - "layer 1"
  - "layer 4"
        "#,
    )
    .expect("expect valid image")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_basic_images() {
        let images = initialize_basic_images();
        assert_eq!(images.len(), 2);
        for (_, image) in images {
            image
                .manifest
                .validate()
                .expect("basic images should have valid manifests");
        }
    }

    #[test]
    fn shared_layers_have_shared_digests() {
        let images = initialize_basic_images();
        assert_eq!(images[0].1.layers[0].digest(), images[1].1.layers[0].digest());
        assert_ne!(images[0].1.config_digest(), images[1].1.config_digest());
    }
}

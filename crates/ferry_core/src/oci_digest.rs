use digest::DynDigest;

use sha2::Sha256;
use sha2::Sha512;
use crate::{Error, Result};

// https://github.com/opencontainers/image-spec/blob/main/descriptor.md#digests
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OciDigest {
    algorithm: RegisteredImageSpecAlgorithm,
    encoded: String,
}

impl TryFrom<&str> for OciDigest {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self> {
        let i = match s.find(':') {
            Some(i) => i,
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let algo: &str = match s.get(..i) {
            Some(a) => a,
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let encoded: &str = match s.get(i + 1..) {
            Some(e) if !e.is_empty() => e,
            Some(_) => return Err(Error::InvalidDigest(s.to_string())),
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        if !encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "=_-".contains(c))
        {
            return Err(Error::InvalidDigest(s.to_string()));
        }
        let algorithm = match algo {
            "sha256" => RegisteredImageSpecAlgorithm::Sha256,
            "sha512" => RegisteredImageSpecAlgorithm::Sha512,
            _ => {
                return Err(Error::InvalidDigest(s.to_string()));
            }
        };

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl TryFrom<&String> for OciDigest {
    type Error = Error;
    fn try_from(s: &String) -> Result<Self> {
        s.as_str().try_into()
    }
}

/// Compute the sha256 digest of a byte slice.
impl From<&[u8]> for OciDigest {
    fn from(bs: &[u8]) -> Self {
        let mut digester = Digester::default();
        digester.update(bs);
        digester.finalize()
    }
}

impl std::fmt::Display for OciDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", String::from(&self.algorithm), self.encoded)
    }
}

impl From<OciDigest> for String {
    fn from(d: OciDigest) -> String {
        d.to_string()
    }
}

impl From<&OciDigest> for String {
    fn from(d: &OciDigest) -> String {
        d.to_string()
    }
}

impl OciDigest {
    pub fn digester(&self) -> Digester {
        match self.algorithm {
            RegisteredImageSpecAlgorithm::Sha256 => Digester::new(
                RegisteredImageSpecAlgorithm::Sha256,
                Box::new(Sha256::default()),
            ),
            RegisteredImageSpecAlgorithm::Sha512 => Digester::new(
                RegisteredImageSpecAlgorithm::Sha512,
                Box::new(Sha512::default()),
            ),
        }
    }

    #[inline]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RegisteredImageSpecAlgorithm {
    Sha256,
    Sha512,
}

impl TryFrom<&str> for RegisteredImageSpecAlgorithm {
    type Error = Error;

    fn try_from(a: &str) -> Result<Self> {
        match a {
            "sha512" => Ok(RegisteredImageSpecAlgorithm::Sha512),
            "sha256" => Ok(RegisteredImageSpecAlgorithm::Sha256),
            s => Err(Error::UnsupportedDigestAlgorithm(String::from(s))),
        }
    }
}

impl From<&RegisteredImageSpecAlgorithm> for String {
    fn from(a: &RegisteredImageSpecAlgorithm) -> String {
        match a {
            RegisteredImageSpecAlgorithm::Sha512 => String::from("sha512"),
            RegisteredImageSpecAlgorithm::Sha256 => String::from("sha256"),
        }
    }
}

/// Incremental digest calculation over the bytes of a blob as they stream past.
pub struct Digester {
    algorithm: RegisteredImageSpecAlgorithm,
    digester: Box<dyn DynDigest + 'static + Send>,
    bytes: u64,
}

impl Digester {
    fn new(
        algorithm: RegisteredImageSpecAlgorithm,
        digester: Box<dyn DynDigest + 'static + Send>,
    ) -> Self {
        Self {
            algorithm,
            digester,
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digester.update(data);
        self.bytes += data.len() as u64;
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> OciDigest {
        let encoded = hex::encode(self.digester.finalize());
        OciDigest {
            algorithm: self.algorithm,
            encoded,
        }
    }
}

impl Default for Digester {
    fn default() -> Self {
        Self::new(
            RegisteredImageSpecAlgorithm::Sha256,
            Box::new(Sha256::default()),
        )
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::sha256("sha256:meow", Ok(OciDigest {
        algorithm: RegisteredImageSpecAlgorithm::Sha256,
        encoded: String::from("meow"),
    }))]
    #[case::sha512("sha512:meow", Ok(OciDigest {
        algorithm: RegisteredImageSpecAlgorithm::Sha512,
        encoded: String::from("meow"),
    }))]
    #[case::unknown_algorithm("sha666:meow", Err(Error::InvalidDigest(String::from("sha666:meow"))))]
    #[case::missing_separator("sha256meow", Err(Error::InvalidDigest(String::from("sha256meow"))))]
    #[case::empty_encoded("sha256:", Err(Error::InvalidDigest(String::from("sha256:"))))]
    #[case::empty_algorithm(":meow", Err(Error::InvalidDigest(String::from(":meow"))))]
    #[case::path_traversal("sha256:../meow", Err(Error::InvalidDigest(String::from("sha256:../meow"))))]
    fn validate_try_from(#[case] input: &str, #[case] expected: Result<OciDigest>) {
        let actual: Result<OciDigest> = input.try_into();
        match (expected, actual) {
            (Ok(exp), Ok(act)) => {
                assert_eq!(exp, act);
            }
            (Ok(s), Err(e)) => {
                assert!(false, "expected Ok( {s:?} ) got Err( {e:?} )");
            }
            (Err(exp), Err(act)) => {
                let exp = format!("{exp}");
                let act = format!("{act}");
                assert_eq!(exp, act);
            }
            (Err(e), Ok(s)) => {
                assert!(false, "expected Err( {e:?} ) got Ok( {s:?} )");
            }
        }
    }

    #[test]
    fn digest_of_bytes() {
        let digest = OciDigest::from(b"hello world".as_slice());
        assert_eq!(
            digest.to_string(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn digester_counts_bytes_across_updates() {
        let expected = OciDigest::from(b"hello world".as_slice());
        let mut digester = expected.digester();
        digester.update(b"hello ");
        digester.update(b"world");
        assert_eq!(digester.bytes(), 11);
        assert_eq!(digester.finalize(), expected);
    }
}

//! Artifact fetching: download sessions, extraction and checksums

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

/// Supported artifact archive kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Gzip-compressed tarball
    TarGz,
    /// Plain tarball
    Tar,
    /// Zip archive
    Zip,
    /// Single raw file, written as-is
    File,
}

impl ArtifactKind {
    /// Parse an artifact kind from its configuration string
    pub fn parse(kind: &str) -> Result<Self, FetchError> {
        match kind {
            "tgz" | "tar.gz" | "targz" => Ok(ArtifactKind::TarGz),
            "tar" => Ok(ArtifactKind::Tar),
            "zip" => Ok(ArtifactKind::Zip),
            "file" => Ok(ArtifactKind::File),
            other => Err(FetchError::UnknownKind(other.to_string())),
        }
    }
}

/// One open artifact, ready to be downloaded or hashed
pub trait FetchSession: Send {
    /// Download and extract the artifact into `dest`
    fn download(&self, dest: &Path) -> Result<(), FetchError>;

    /// Hex-encoded content hash of the artifact, without staging it
    fn checksum(&self) -> Result<String, FetchError>;
}

/// Opens fetch sessions for artifact URIs
pub trait Fetcher: Send + Sync {
    fn open(&self, uri: &str, kind: &str) -> Result<Box<dyn FetchSession>, FetchError>;
}

/// Default fetcher: http(s) URIs via a blocking HTTP client, anything else
/// treated as a local filesystem path.
#[derive(Debug, Default)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn open(&self, uri: &str, kind: &str) -> Result<Box<dyn FetchSession>, FetchError> {
        let kind = ArtifactKind::parse(kind)?;
        Ok(Box::new(HttpSession {
            uri: uri.to_string(),
            kind,
        }))
    }
}

struct HttpSession {
    uri: String,
    kind: ArtifactKind,
}

impl HttpSession {
    fn fetch_bytes(&self) -> Result<Vec<u8>, FetchError> {
        if self.uri.starts_with("http://") || self.uri.starts_with("https://") {
            let response = reqwest::blocking::get(&self.uri)
                .and_then(|r| r.error_for_status())
                .map_err(|e| FetchError::Http {
                    uri: self.uri.clone(),
                    source: e,
                })?;
            let bytes = response.bytes().map_err(|e| FetchError::Http {
                uri: self.uri.clone(),
                source: e,
            })?;
            Ok(bytes.to_vec())
        } else {
            std::fs::read(&self.uri).map_err(|e| FetchError::Io {
                uri: self.uri.clone(),
                source: e,
            })
        }
    }

    fn file_name(&self) -> Result<&str, FetchError> {
        self.uri
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| FetchError::InvalidUri(self.uri.clone()))
    }
}

impl FetchSession for HttpSession {
    fn download(&self, dest: &Path) -> Result<(), FetchError> {
        let bytes = self.fetch_bytes()?;
        let io_err = |e: std::io::Error| FetchError::Io {
            uri: self.uri.clone(),
            source: e,
        };

        match self.kind {
            ArtifactKind::TarGz => {
                tar::Archive::new(GzDecoder::new(&bytes[..]))
                    .unpack(dest)
                    .map_err(io_err)?;
            }
            ArtifactKind::Tar => {
                tar::Archive::new(&bytes[..]).unpack(dest).map_err(io_err)?;
            }
            ArtifactKind::Zip => {
                zip::ZipArchive::new(Cursor::new(bytes))?.extract(dest)?;
            }
            ArtifactKind::File => {
                let path = dest.join(self.file_name()?);
                std::fs::write(&path, &bytes).map_err(io_err)?;
                // a raw-file artifact is the sidecar executable itself
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                        .map_err(io_err)?;
                }
            }
        }
        Ok(())
    }

    fn checksum(&self) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Errors that can occur while fetching an artifact
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unknown artifact type: {0}")]
    UnknownKind(String),

    #[error("invalid artifact uri: {0}")]
    InvalidUri(String),

    #[error("http request failed for '{uri}': {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("io error for '{uri}': {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("zip extraction failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

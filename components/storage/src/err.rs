use std::path::PathBuf;

use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("invalid modified cache entry {}: {}", path.display(), detail))]
    InvalidCache {
        path: PathBuf,
        detail: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't create directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't open chunk file {}", path.display()))]
    OpenChunk {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't read chunk file {}", path.display()))]
    ReadChunk {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't write chunk file {}", path.display()))]
    WriteChunk {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't resize chunk file {}", path.display()))]
    ResizeChunk {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't remove chunk file {}", path.display()))]
    RemoveChunk {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't update uploaded marker {}", path.display()))]
    Marker {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't scan overlay directory {}", path.display()))]
    ScanCache {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("couldn't push chunk {} to the pool", chunk))]
    PoolUpload {
        chunk: u64,
        source: object_store::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Error {
    /// The on-disk overlay layout itself is damaged; mount must fail.
    pub fn is_invalid_cache(&self) -> bool {
        matches!(self, Error::InvalidCache { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Staging writer and remote object stores.

pub mod object_store;
pub mod writer;

pub use object_store::{FsObjectStore, HttpObjectStore, ObjectStore, ObjectStoreError};
pub use writer::{
    list_artifacts, run_stamp, ArtifactLocation, RemotePublisher, StagedArtifact, StagingWriter,
    RAW_LOGICAL_NAME, RUN_STAMP_FORMAT, TRANSFORMED_LOGICAL_NAME,
};

//! `ingest-sources` — data-fetch collaborators for ingestion jobs.
//!
//! A job names its source in `args.source`; the [`SourceRegistry`] resolves
//! that name to a [`DataSource`] and the executor calls
//! [`DataSource::fetch`] with the job's full argument bag.

pub mod error;
pub mod file;
pub mod mock;
pub mod registry;
pub mod source;

pub use error::FetchError;
pub use file::FileSource;
pub use mock::MockSource;
pub use registry::SourceRegistry;
pub use source::DataSource;

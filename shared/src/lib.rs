//! Shared client core for the Sebotsa Farmers Hub marketplace.
//!
//! Platform shells (mobile, web) own rendering and platform APIs; this crate
//! owns list state, optimistic mutations, authorization decisions,
//! connectivity tracking, form validation and uploads. All I/O goes through
//! the traits in [`capabilities`].

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod authz;
pub mod capabilities;
pub mod collection;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod map;
pub mod model;
pub mod preferences;
pub mod upload;
pub mod validation;

pub use authz::{can_list_new_item, can_mutate, require_mutate, require_signed_in};
pub use collection::{CollectionItem, CollectionViewModel, MutationPhase};
pub use config::{ConfigError, CoreConfig};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, Subscription};
pub use error::{BackendError, CoreError, CoreResult, ErrorKind, MutationKind};
pub use model::{
    AnyRecord, Collection, CurrentUser, DerivedState, Payload, Record, RecordBase, RecordFilter,
    RecordId, UserId,
};
pub use preferences::Theme;
pub use upload::{upload_image, UploadError, UploadedFile};
pub use validation::{Validate, ValidationErrors};

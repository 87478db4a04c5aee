//! Data model shared by every back end.

pub mod desc;
pub mod ids;
pub mod indom;
pub mod profile;
pub mod value;

pub use desc::{Desc, Semantics, Units, ValueType};
pub use ids::{InDom, ParseIdError, Pmid};
pub use indom::InDomInstances;
pub use profile::{IndomProfile, InstanceProfile};
pub use value::{FetchResult, IN_NULL, InstanceValue, Timestamp, Value, ValueSet};

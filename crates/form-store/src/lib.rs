//! Immutable, copy-on-write store of versioned form values.
//!
//! Each [`FormNode`] wraps one form instance: the live contact, the
//! committed contact history and the child forms. Mutations never touch an
//! existing node; they produce a new one and publish a [`NodeChange`] to
//! the lineage's [`Observers`].

pub mod error;
pub mod factory;
pub mod node;
pub mod observe;

pub use error::{Result, StoreError};
pub use factory::{
    FormChildrenProvider, FormFactory, NoFormFactory, NodeFactories, ServiceFactory,
    UuidServiceFactory,
};
pub use node::{FormNode, NodeChange};
pub use observe::{Observers, Subscription};

//! Collaborators that create records and form instances.

use std::fmt;
use std::rc::Rc;

use form_model::{FormInstance, Service};
use futures_util::FutureExt;
use futures_util::future::{self, LocalBoxFuture};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Creates the empty record backing a field.
pub trait ServiceFactory {
    fn create(&self, label: &str, id: Option<&str>) -> Service;
}

impl<F> ServiceFactory for F
where
    F: Fn(&str, Option<&str>) -> Service,
{
    fn create(&self, label: &str, id: Option<&str>) -> Service {
        self(label, id)
    }
}

/// Keeps the requested id or draws a random one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidServiceFactory;

impl ServiceFactory for UuidServiceFactory {
    fn create(&self, label: &str, id: Option<&str>) -> Service {
        let id = id.map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
        Service::new(id, label)
    }
}

/// Creates and destroys nested form instances.
pub trait FormFactory {
    fn create_form<'a>(
        &'a self,
        parent_id: &'a str,
        anchor_id: &'a str,
        template_id: &'a str,
        label: &'a str,
    ) -> LocalBoxFuture<'a, Result<FormInstance>>;

    fn recycle_form<'a>(&'a self, form_id: &'a str) -> LocalBoxFuture<'a, Result<()>>;
}

/// Factory for trees that never grow: every request fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFormFactory;

impl FormFactory for NoFormFactory {
    fn create_form<'a>(
        &'a self,
        _parent_id: &'a str,
        _anchor_id: &'a str,
        template_id: &'a str,
        _label: &'a str,
    ) -> LocalBoxFuture<'a, Result<FormInstance>> {
        future::ready(Err(StoreError::Factory(format!(
            "cannot create a {template_id} form without a form factory"
        ))))
        .boxed_local()
    }

    fn recycle_form<'a>(&'a self, form_id: &'a str) -> LocalBoxFuture<'a, Result<()>> {
        future::ready(Err(StoreError::Factory(format!(
            "cannot recycle form {form_id} without a form factory"
        ))))
        .boxed_local()
    }
}

/// Lists the stored sub-forms of a form.
pub trait FormChildrenProvider {
    fn children<'a>(&'a self, parent_id: &'a str) -> LocalBoxFuture<'a, Result<Vec<FormInstance>>>;
}

/// Factories shared by every node of a tree.
#[derive(Clone)]
pub struct NodeFactories {
    pub services: Rc<dyn ServiceFactory>,
    pub forms: Rc<dyn FormFactory>,
}

impl NodeFactories {
    pub fn new(services: impl ServiceFactory + 'static, forms: impl FormFactory + 'static) -> Self {
        Self {
            services: Rc::new(services),
            forms: Rc::new(forms),
        }
    }
}

impl Default for NodeFactories {
    fn default() -> Self {
        Self::new(UuidServiceFactory, NoFormFactory)
    }
}

impl fmt::Debug for NodeFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFactories").finish_non_exhaustive()
    }
}

//! Immutable store nodes.
//!
//! A [`FormNode`] is one version of a form instance's values: the live
//! contact, the committed history and the child forms. Every mutation
//! builds a new node sharing the lineage's listener registry and publishes
//! a [`NodeChange`]. Children reach their parent through an upstream hook
//! bound to the parent's lineage, which keeps its newest committed version
//! while it has children, so a leaf edit rebuilds every ancestor up to the
//! root. [`FormNode::release`] drops that hold once a tree is discarded.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use form_model::dates::now_millis;
use form_model::{
    CodeStub, Contact, FormInstance, Revision, Service, ServiceLink, ServiceMetadata, SubContact,
    Version, VersionedData, are_codes_equal, is_content_equal, normalize_codes,
};
use futures_util::FutureExt;
use futures_util::future::{LocalBoxFuture, try_join_all};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::factory::{FormChildrenProvider, NodeFactories};
use crate::observe::{Observers, Subscription};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// A new node version and the fields whose values changed to produce it.
///
/// Structural changes (children added, removed or updated, deletions)
/// carry no changed fields.
#[derive(Debug, Clone)]
pub struct NodeChange {
    pub node: FormNode,
    pub changed: Vec<ServiceMetadata>,
}

impl NodeChange {
    /// Publishes the change to the listeners of the node's lineage and to
    /// its parent.
    pub fn commit(&self) {
        debug!(
            node = self.node.id(),
            form = self.node.inner.form.template_id.as_deref().unwrap_or_default(),
            changed = self.changed.len(),
            "publishing node change"
        );
        let lineage = &self.node.inner.lineage;
        *lineage.newest.borrow_mut() =
            (!self.node.inner.children.is_empty()).then(|| self.node.clone());
        lineage.observers.notify(self);
    }

    pub fn changed_labels(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(|meta| meta.label.as_str())
    }
}

/// State shared by every version of a node lineage.
#[derive(Default)]
struct Lineage {
    observers: Observers<NodeChange>,
    /// Newest committed version, held only while it has children.
    newest: RefCell<Option<FormNode>>,
}

struct NodeInner {
    id: u64,
    form: FormInstance,
    current: Rc<Contact>,
    history: Vec<Rc<Contact>>,
    children: Vec<FormNode>,
    /// Anchored services by id: the live contact first, then history.
    index: BTreeMap<String, Vec<Version<Service>>>,
    factories: NodeFactories,
    lineage: Rc<Lineage>,
}

/// One immutable version of a form's values.
#[derive(Clone)]
pub struct FormNode {
    inner: Rc<NodeInner>,
}

impl FormNode {
    /// Builds the first version of a node lineage.
    ///
    /// `history` is sorted most recent first and must not contain
    /// `current` itself.
    pub fn new(
        form: FormInstance,
        current: Rc<Contact>,
        mut history: Vec<Rc<Contact>>,
        children: Vec<FormNode>,
        factories: NodeFactories,
    ) -> Result<Self> {
        if history.iter().any(|contact| Rc::ptr_eq(contact, &current)) {
            return Err(StoreError::HistoryContainsCurrent);
        }
        history.sort_by_key(|contact| Reverse(contact.created));
        let node = Self::assemble(
            form,
            current,
            history,
            children,
            factories,
            Rc::default(),
        );
        for child in &node.inner.children {
            node.link_child(child);
        }
        if !node.inner.children.is_empty() {
            *node.inner.lineage.newest.borrow_mut() = Some(node.clone());
        }
        Ok(node)
    }

    /// Builds a node and its whole sub-form tree.
    pub fn from_forms_hierarchy<'a>(
        form: FormInstance,
        current: Rc<Contact>,
        history: Vec<Rc<Contact>>,
        factories: NodeFactories,
        children_provider: &'a dyn FormChildrenProvider,
    ) -> LocalBoxFuture<'a, Result<FormNode>> {
        async move {
            let child_forms = match form.id.as_deref() {
                Some(id) => children_provider.children(id).await?,
                None => Vec::new(),
            };
            let children = try_join_all(child_forms.into_iter().map(|child| {
                Self::from_forms_hierarchy(
                    child,
                    Rc::clone(&current),
                    history.clone(),
                    factories.clone(),
                    children_provider,
                )
            }))
            .await?;
            Self::new(form, current, history, children, factories)
        }
        .boxed_local()
    }

    fn assemble(
        form: FormInstance,
        current: Rc<Contact>,
        history: Vec<Rc<Contact>>,
        children: Vec<FormNode>,
        factories: NodeFactories,
        lineage: Rc<Lineage>,
    ) -> Self {
        let index = index_services(&form, &current, &history);
        Self {
            inner: Rc::new(NodeInner {
                id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
                form,
                current,
                history,
                children,
                index,
                factories,
                lineage,
            }),
        }
    }

    /// Next version of this lineage.
    fn rebuild(&self, current: Rc<Contact>, children: Vec<FormNode>) -> Self {
        Self::assemble(
            self.inner.form.clone(),
            current,
            self.inner.history.clone(),
            children,
            self.inner.factories.clone(),
            Rc::clone(&self.inner.lineage),
        )
    }

    /// Routes the changes of `child`'s lineage to the newest version of
    /// this lineage.
    fn link_child(&self, child: &FormNode) {
        let parent = Rc::downgrade(&self.inner.lineage);
        child
            .inner
            .lineage
            .observers
            .set_upstream(move |change: &NodeChange| {
                let newest = parent
                    .upgrade()
                    .and_then(|lineage| lineage.newest.borrow().clone());
                match newest {
                    Some(parent) => parent.replace_child(&change.node),
                    None => debug!(child = change.node.id(), "parent released, change dropped"),
                }
            });
    }

    fn replace_child(&self, updated: &FormNode) {
        if !self
            .inner
            .children
            .iter()
            .any(|child| child.same_lineage(updated))
        {
            debug!(parent = self.id(), child = updated.id(), "not a child of this form");
            return;
        }
        debug!(
            parent = self.id(),
            child = updated.id(),
            "child changed, rebuilding parent"
        );
        let children = self
            .inner
            .children
            .iter()
            .map(|child| {
                if child.same_lineage(updated) {
                    updated.clone()
                } else {
                    child.clone()
                }
            })
            .collect();
        let node = self.rebuild(Rc::clone(&self.inner.current), children);
        NodeChange {
            node,
            changed: Vec::new(),
        }
        .commit();
    }

    /// Process-unique id of this version, for log correlation.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn form(&self) -> &FormInstance {
        &self.inner.form
    }

    pub fn label(&self) -> &str {
        self.inner.form.descr.as_deref().unwrap_or_default()
    }

    pub fn template_id(&self) -> Option<&str> {
        self.inner.form.template_id.as_deref()
    }

    pub fn current(&self) -> &Rc<Contact> {
        &self.inner.current
    }

    pub fn history(&self) -> &[Rc<Contact>] {
        &self.inner.history
    }

    pub fn children(&self) -> &[FormNode] {
        &self.inner.children
    }

    /// True when both nodes are versions of the same lineage.
    pub fn same_lineage(&self, other: &FormNode) -> bool {
        Rc::ptr_eq(&self.inner.lineage, &other.inner.lineage)
    }

    /// Listens to every change of this lineage.
    pub fn subscribe(&self, listener: impl Fn(&NodeChange) + 'static) -> Subscription {
        self.inner.lineage.observers.subscribe(listener)
    }

    /// Lets this tree be dropped: every lineage of the subtree forgets its
    /// newest version, so child edits no longer reach their parent.
    pub fn release(&self) {
        let newest = self.inner.lineage.newest.borrow_mut().take();
        for child in newest
            .iter()
            .chain(std::iter::once(self))
            .flat_map(|node| node.inner.children.iter())
        {
            child.release();
        }
    }

    /// Anchored services whose revisions pass `filter`, most recently
    /// modified first. Ids with no visible revision are left out.
    pub fn values(
        &self,
        filter: impl Fn(&str, &[Version<ServiceMetadata>]) -> Vec<Revision>,
    ) -> VersionedData<Service> {
        self.inner
            .index
            .iter()
            .filter_map(|(id, history)| {
                let metadata: Vec<Version<ServiceMetadata>> = history
                    .iter()
                    .map(|version| version.clone().map(|service| service_metadata(&service)))
                    .collect();
                let kept = filter(id, &metadata);
                let mut versions: Vec<Version<Service>> = history
                    .iter()
                    .filter(|version| kept.contains(&version.revision))
                    .cloned()
                    .collect();
                if versions.is_empty() {
                    return None;
                }
                versions.sort_by_key(|version| Reverse(version.modified));
                Some((id.clone(), versions))
            })
            .collect()
    }

    /// Metadata of service `id` in the contacts whose revision is listed.
    pub fn metadata(&self, id: &str, revisions: &[Revision]) -> VersionedData<ServiceMetadata> {
        let versions: Vec<Version<ServiceMetadata>> = self
            .contacts()
            .filter(|contact| revisions.contains(&contact.rev))
            .filter_map(|contact| {
                contact.service(id).map(|service| {
                    Version::new(
                        contact.rev.clone(),
                        service.modified.unwrap_or(contact.created),
                        service_metadata(service),
                    )
                })
            })
            .collect();
        if versions.is_empty() {
            BTreeMap::new()
        } else {
            BTreeMap::from([(id.to_string(), versions)])
        }
    }

    /// Computes the node that writing `value` for `language` would produce,
    /// without notifying anyone. `Ok(None)` when content and codes are
    /// unchanged.
    pub fn stage_value(
        &self,
        label: &str,
        language: &str,
        value: Option<&Service>,
        id: Option<&str>,
        metadata: Option<&ServiceMetadata>,
    ) -> Result<Option<NodeChange>> {
        let form_id = self.form_id()?;
        let service = id
            .and_then(|id| self.latest_service(id))
            .unwrap_or_else(|| self.inner.factories.services.create(label, id));
        let service_id = service
            .id
            .clone()
            .ok_or_else(|| StoreError::MissingServiceId {
                label: label.to_string(),
            })?;

        let new_content = value.and_then(|v| v.content.get(language));
        let new_codes = match value {
            Some(v) => normalize_codes(&v.codes)?,
            None => Vec::new(),
        };
        if is_content_equal(service.content.get(language), new_content)
            && are_codes_equal(&new_codes, &service.codes)
        {
            return Ok(None);
        }

        let mut updated = service;
        updated.modified = Some(now_millis());
        match new_content {
            Some(content) => {
                updated.content.insert(language.to_string(), content.clone());
            }
            None => {
                updated.content.remove(language);
            }
        }

        let mut contact = (*self.inner.current).clone();
        link_service(&mut contact, form_id, &service_id);
        if updated.content.is_empty() {
            debug!(node = self.id(), service = %service_id, "unlinking emptied service");
            contact
                .services
                .retain(|s| s.id.as_deref() != Some(service_id.as_str()));
        } else {
            updated.codes = new_codes;
            if let Some(meta) = metadata {
                if meta.responsible.is_some() {
                    updated.responsible.clone_from(&meta.responsible);
                }
                if meta.value_date.is_some() {
                    updated.value_date = meta.value_date;
                }
                if let Some(tags) = &meta.tags {
                    updated.tags = normalize_codes(tags)?;
                }
                updated.label = Some(meta.label.clone());
            }
            upsert_service(&mut contact, updated.clone());
        }

        let changed = ServiceMetadata {
            label: updated.label.clone().unwrap_or_else(|| label.to_string()),
            responsible: updated.responsible.clone(),
            value_date: updated.value_date,
            codes: None,
            tags: Some(normalize_codes(&updated.tags)?),
        };
        Ok(Some(NodeChange {
            node: self.rebuild(Rc::new(contact), self.inner.children.clone()),
            changed: vec![changed],
        }))
    }

    /// Writes a value and publishes the resulting change. Returns `false`
    /// when nothing changed.
    pub fn set_value(
        &self,
        label: &str,
        language: &str,
        value: Option<&Service>,
        id: Option<&str>,
        metadata: Option<&ServiceMetadata>,
    ) -> Result<bool> {
        let Some(change) = self.stage_value(label, language, value, id, metadata)? else {
            return Ok(false);
        };
        change.commit();
        Ok(true)
    }

    /// Stages a metadata update. Only the members set in `meta` are
    /// compared and written.
    pub fn stage_metadata(
        &self,
        meta: &ServiceMetadata,
        id: Option<&str>,
    ) -> Result<Option<NodeChange>> {
        // A record known only from history keeps its content.
        let service = id
            .and_then(|id| {
                self.inner
                    .current
                    .service(id)
                    .cloned()
                    .or_else(|| self.latest_service(id))
            })
            .unwrap_or_else(|| self.inner.factories.services.create(&meta.label, id));
        let service_id = service
            .id
            .clone()
            .ok_or_else(|| StoreError::MissingServiceId {
                label: meta.label.clone(),
            })?;

        let codes = meta.codes.as_deref().map(normalize_codes).transpose()?;
        let tags = meta.tags.as_deref().map(normalize_codes).transpose()?;
        let differs = |wanted: Option<&Vec<CodeStub>>, present: &[CodeStub]| {
            wanted.is_some_and(|wanted| !are_codes_equal(wanted, present))
        };
        let changed = (meta.responsible.is_some() && service.responsible != meta.responsible)
            || (meta.value_date.is_some() && service.value_date != meta.value_date)
            || differs(codes.as_ref(), &service.codes)
            || differs(tags.as_ref(), &service.tags);
        if !changed {
            return Ok(None);
        }

        let mut updated = service;
        updated.modified = Some(now_millis());
        if meta.responsible.is_some() {
            updated.responsible.clone_from(&meta.responsible);
        }
        if meta.value_date.is_some() {
            updated.value_date = meta.value_date;
        }
        if let Some(codes) = codes {
            updated.codes = codes;
        }
        if let Some(tags) = tags {
            updated.tags = tags;
        }

        let mut contact = (*self.inner.current).clone();
        if contact.service(&service_id).is_none() {
            link_service(&mut contact, self.form_id()?, &service_id);
        }
        upsert_service(&mut contact, updated);
        Ok(Some(NodeChange {
            node: self.rebuild(Rc::new(contact), self.inner.children.clone()),
            changed: vec![meta.clone()],
        }))
    }

    pub fn set_metadata(&self, meta: &ServiceMetadata, id: Option<&str>) -> Result<bool> {
        let Some(change) = self.stage_metadata(meta, id)? else {
            return Ok(false);
        };
        change.commit();
        Ok(true)
    }

    /// Stages the soft deletion of a service of the live contact.
    pub fn stage_delete(&self, id: &str) -> Option<NodeChange> {
        let mut service = self.inner.current.service(id)?.clone();
        service.end_of_life = Some(now_millis());
        let mut contact = (*self.inner.current).clone();
        upsert_service(&mut contact, service);
        Some(NodeChange {
            node: self.rebuild(Rc::new(contact), self.inner.children.clone()),
            changed: Vec::new(),
        })
    }

    /// Marks service `id` as ended now. Returns `false` when the live
    /// contact has no such service.
    pub fn delete(&self, id: &str) -> bool {
        let Some(change) = self.stage_delete(id) else {
            return false;
        };
        change.commit();
        true
    }

    /// Creates a sub-form through the form factory and appends it as an
    /// empty child.
    pub async fn add_child(&self, anchor_id: &str, template_id: &str, label: &str) -> Result<()> {
        let parent_id = self.form_id()?;
        let form = self
            .inner
            .factories
            .forms
            .create_form(parent_id, anchor_id, template_id, label)
            .await?;
        debug!(node = self.id(), template = template_id, "adding child form");
        let child = Self::assemble(
            form,
            Rc::clone(&self.inner.current),
            self.inner.history.clone(),
            Vec::new(),
            self.inner.factories.clone(),
            Rc::default(),
        );
        self.link_child(&child);
        let mut children = self.inner.children.clone();
        children.push(child);
        NodeChange {
            node: self.rebuild(Rc::clone(&self.inner.current), children),
            changed: Vec::new(),
        }
        .commit();
        Ok(())
    }

    /// Recycles the child's form instance, then drops the child.
    pub async fn remove_child(&self, child: &FormNode) -> Result<()> {
        let form_id = child.form_id()?;
        self.inner.factories.forms.recycle_form(form_id).await?;
        debug!(node = self.id(), child = child.id(), "removing child form");
        let children = self
            .inner
            .children
            .iter()
            .filter(|candidate| !candidate.same_lineage(child))
            .cloned()
            .collect();
        child.inner.lineage.observers.clear_upstream();
        child.release();
        NodeChange {
            node: self.rebuild(Rc::clone(&self.inner.current), children),
            changed: Vec::new(),
        }
        .commit();
        Ok(())
    }

    /// The live contact restricted to this subtree: the services and
    /// sub-contacts anchored to this form or any descendant.
    pub fn coordinated_contact(&self) -> Contact {
        let children: Vec<Contact> = self
            .inner
            .children
            .iter()
            .map(FormNode::coordinated_contact)
            .collect();
        let current = &self.inner.current;
        let form_id = self.inner.form.id.as_deref();
        let own_sub_contacts: Vec<&SubContact> = current
            .sub_contacts
            .iter()
            .filter(|sc| form_id.is_some() && sc.form_id.as_deref() == form_id)
            .collect();

        let mut services: Vec<Service> = children
            .iter()
            .flat_map(|contact| contact.services.iter().cloned())
            .collect();
        services.extend(
            current
                .services
                .iter()
                .filter(|service| {
                    service
                        .id
                        .as_deref()
                        .is_some_and(|id| own_sub_contacts.iter().any(|sc| sc.links(id)))
                })
                .cloned(),
        );

        let mut sub_contacts: Vec<SubContact> = children
            .iter()
            .flat_map(|contact| contact.sub_contacts.iter().cloned())
            .collect();
        sub_contacts.extend(own_sub_contacts.into_iter().cloned());

        Contact {
            services,
            sub_contacts,
            ..(**current).clone()
        }
    }

    /// This form and every descendant form, depth first.
    pub fn all_forms(&self) -> Vec<FormInstance> {
        std::iter::once(self.inner.form.clone())
            .chain(self.inner.children.iter().flat_map(FormNode::all_forms))
            .collect()
    }

    fn form_id(&self) -> Result<&str> {
        self.inner.form.id.as_deref().ok_or_else(|| {
            StoreError::MissingFormId(
                self.inner
                    .form
                    .template_id
                    .clone()
                    .unwrap_or_else(|| self.label().to_string()),
            )
        })
    }

    fn contacts(&self) -> impl Iterator<Item = &Rc<Contact>> {
        std::iter::once(&self.inner.current).chain(self.inner.history.iter())
    }

    /// Most recent anchored version of a service, live contact first.
    fn latest_service(&self, id: &str) -> Option<Service> {
        self.inner
            .index
            .get(id)
            .and_then(|history| history.first())
            .map(|version| version.value.clone())
    }
}

impl fmt::Debug for FormNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormNode")
            .field("id", &self.inner.id)
            .field("form", &self.inner.form.id)
            .field("template", &self.inner.form.template_id)
            .field("children", &self.inner.children.len())
            .finish_non_exhaustive()
    }
}

fn index_services(
    form: &FormInstance,
    current: &Rc<Contact>,
    history: &[Rc<Contact>],
) -> BTreeMap<String, Vec<Version<Service>>> {
    let mut index: BTreeMap<String, Vec<Version<Service>>> = BTreeMap::new();
    let Some(form_id) = form.id.as_deref() else {
        return index;
    };
    for contact in std::iter::once(current).chain(history) {
        for service in &contact.services {
            let Some(id) = service.id.as_deref() else {
                continue;
            };
            if contact.anchors(form_id, id) {
                index.entry(id.to_string()).or_default().push(Version::new(
                    contact.rev.clone(),
                    contact.created,
                    service.clone(),
                ));
            }
        }
    }
    index
}

fn service_metadata(service: &Service) -> ServiceMetadata {
    ServiceMetadata {
        label: service
            .label
            .clone()
            .or_else(|| service.id.clone())
            .unwrap_or_default(),
        responsible: service.responsible.clone(),
        value_date: service.value_date,
        codes: Some(service.codes.clone()),
        tags: Some(
            service
                .tags
                .iter()
                .map(|tag| tag.normalize().unwrap_or_else(|_| tag.clone()))
                .collect(),
        ),
    }
}

/// Moves the link of `service_id` to the end of the form's sub-contact,
/// creating the sub-contact when missing.
fn link_service(contact: &mut Contact, form_id: &str, service_id: &str) {
    let link = ServiceLink {
        service_id: service_id.to_string(),
    };
    match contact
        .sub_contacts
        .iter_mut()
        .find(|sc| sc.form_id.as_deref() == Some(form_id))
    {
        Some(sub_contact) => {
            sub_contact.services.retain(|l| l.service_id != service_id);
            sub_contact.services.push(link);
        }
        None => {
            let mut sub_contact = SubContact::for_form(form_id);
            sub_contact.services.push(link);
            contact.sub_contacts.push(sub_contact);
        }
    }
}

fn upsert_service(contact: &mut Contact, service: Service) {
    match contact
        .services
        .iter_mut()
        .find(|existing| existing.id.is_some() && existing.id == service.id)
    {
        Some(existing) => *existing = service,
        None => contact.services.push(service),
    }
}

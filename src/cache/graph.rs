//! Graph invalidation - Clears every cache reachable from a root value.
//!
//! A participating type lists its cache fields once in
//! [`CacheGraph::describe`]. The first invalidation of a type turns that
//! list into an [`InvalidationPlan`], memoized for the rest of the process,
//! so invalidating many instances only pays for the description once.

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use super::traits::{Cache, CacheOf, CacheStorage, Storage};

/// A type whose cache fields can be invalidated as a graph.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use lazycache::{invalidate_graph, CacheGraph, FieldSet, KeyedCache, SingleValueCache};
///
/// struct Module {
///     name: SingleValueCache<String>,
/// }
///
/// struct Program {
///     modules: KeyedCache<u32, Arc<Module>>,
/// }
///
/// impl CacheGraph for Module {
///     fn describe(fields: &mut FieldSet<Self>) {
///         fields.cache("name", |m| &m.name);
///     }
/// }
///
/// impl CacheGraph for Program {
///     fn describe(fields: &mut FieldSet<Self>) {
///         fields.nested("modules", |p| &p.modules);
///     }
/// }
///
/// let program = Program {
///     modules: KeyedCache::new(|id: &u32| {
///         let id = *id;
///         Arc::new(Module { name: SingleValueCache::new(move || format!("m{id}")) })
///     }),
/// };
/// let module = program.modules.get(&1);
/// assert_eq!(module.name.value(), "m1");
///
/// invalidate_graph(Some(&program));
/// assert!(!module.name.is_cached());
/// assert!(program.modules.is_empty());
/// ```
pub trait CacheGraph: Sized + Send + Sync + 'static {
    /// Register the cache fields of `Self`.
    ///
    /// Called once per type, the first time a value of the type is
    /// invalidated.
    fn describe(fields: &mut FieldSet<Self>);
}

/// What a plan knows about one registered field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub storage: Storage,
    /// The field may be absent and is skipped when it is.
    pub optional: bool,
    /// Cached elements are themselves graphs and are invalidated first.
    pub recursive: bool,
}

type Step<R> = Box<dyn Fn(&R) + Send + Sync>;

struct Field<R> {
    info: FieldInfo,
    invalidate: Step<R>,
}

/// Field registrations collected by [`CacheGraph::describe`].
pub struct FieldSet<R> {
    fields: Vec<Field<R>>,
}

impl<R: 'static> FieldSet<R> {
    fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn push(&mut self, info: FieldInfo, invalidate: Step<R>) -> &mut Self {
        self.fields.push(Field { info, invalidate });
        self
    }

    /// A cache field whose elements hold no caches of their own, or hold
    /// them inline (those are cleared with the cache, not visited).
    pub fn cache<C>(&mut self, name: &'static str, field: fn(&R) -> &C) -> &mut Self
    where
        C: Cache + CacheStorage + 'static,
    {
        let info = FieldInfo {
            name,
            storage: C::STORAGE,
            optional: false,
            recursive: false,
        };
        self.push(info, Box::new(move |root: &R| field(root).invalidate()))
    }

    /// A cache field that may be absent.
    pub fn optional_cache<C>(&mut self, name: &'static str, field: fn(&R) -> Option<&C>) -> &mut Self
    where
        C: Cache + CacheStorage + 'static,
    {
        let info = FieldInfo {
            name,
            storage: C::STORAGE,
            optional: true,
            recursive: false,
        };
        self.push(
            info,
            Box::new(move |root: &R| {
                if let Some(cache) = field(root) {
                    cache.invalidate();
                }
            }),
        )
    }

    /// A cache field holding shared elements that carry caches themselves.
    ///
    /// Every currently cached element is invalidated as a graph before the
    /// field itself is invalidated.
    pub fn nested<C, E>(&mut self, name: &'static str, field: fn(&R) -> &C) -> &mut Self
    where
        C: CacheOf<Arc<E>> + CacheStorage + 'static,
        E: CacheGraph,
    {
        let info = FieldInfo {
            name,
            storage: C::STORAGE,
            optional: false,
            recursive: true,
        };
        self.push(info, Box::new(move |root: &R| invalidate_nested(field(root))))
    }

    /// A nested cache field that may be absent.
    pub fn optional_nested<C, E>(&mut self, name: &'static str, field: fn(&R) -> Option<&C>) -> &mut Self
    where
        C: CacheOf<Arc<E>> + CacheStorage + 'static,
        E: CacheGraph,
    {
        let info = FieldInfo {
            name,
            storage: C::STORAGE,
            optional: true,
            recursive: true,
        };
        self.push(
            info,
            Box::new(move |root: &R| {
                if let Some(cache) = field(root) {
                    invalidate_nested(cache);
                }
            }),
        )
    }
}

// Children first: clearing the cache drops the references needed to reach them.
fn invalidate_nested<C, E>(cache: &C)
where
    C: CacheOf<Arc<E>>,
    E: CacheGraph,
{
    let plan = plan_for::<E>();
    for element in cache.cached_values() {
        plan.apply(&element);
    }
    cache.invalidate();
}

/// The invalidation procedure of one type, built from its field list.
pub struct InvalidationPlan<R> {
    type_name: &'static str,
    fields: Vec<Field<R>>,
}

impl<R: CacheGraph> InvalidationPlan<R> {
    fn build() -> Self {
        let mut fields = FieldSet::new();
        R::describe(&mut fields);

        let plan = Self {
            type_name: type_name::<R>(),
            fields: fields.fields,
        };
        debug!("Built invalidation plan for {} ({} cache fields)", plan.type_name, plan.fields.len());
        plan
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The registered fields, in invalidation order.
    pub fn fields(&self) -> impl Iterator<Item = FieldInfo> + '_ {
        self.fields.iter().map(|field| field.info)
    }

    /// Invalidate every registered field of `root`.
    pub fn apply(&self, root: &R) {
        for field in &self.fields {
            (field.invalidate)(root);
        }
    }
}

/// Plans by type, leaked so they live as long as the process.
static PLANS: Lazy<DashMap<TypeId, &'static (dyn Any + Send + Sync)>> = Lazy::new(DashMap::new);

/// Get the plan of `R`, building it on first use.
pub fn plan_for<R: CacheGraph>() -> &'static InvalidationPlan<R> {
    let id = TypeId::of::<R>();
    let plan = match PLANS.get(&id) {
        Some(plan) => *plan,
        // `describe` only registers fields, so building under the entry lock
        // cannot re-enter the table.
        None => *PLANS.entry(id).or_insert_with(|| {
            let plan: &'static (dyn Any + Send + Sync) = Box::leak(Box::new(InvalidationPlan::<R>::build()));
            plan
        }),
    };
    plan.downcast_ref::<InvalidationPlan<R>>()
        .expect("plan table is keyed by TypeId")
}

/// Invalidate every cache reachable from a shared root.
///
/// A `None` root is a no-op.
pub fn invalidate_graph<R: CacheGraph>(root: Option<&R>) {
    if let Some(root) = root {
        plan_for::<R>().apply(root);
    }
}

/// Invalidate every cache reachable from a value root, in place.
///
/// Takes the root by mutable reference so the caller's value is the one
/// cleared. Passing a temporary copy (`&mut root.clone()`) clears only the
/// copy, whose inline caches diverged from the original's.
pub fn invalidate_graph_in_place<R: CacheGraph>(root: &mut R) {
    plan_for::<R>().apply(root);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        CacheRegistry, ContextualValueCache, IndexedCache, KeyedCache, SingleValueCache,
        SingleValueCacheByValue,
    };
    use crate::test_support::init_tracing;

    struct Leaf {
        label: SingleValueCache<String>,
        sizes: KeyedCache<u32, usize>,
    }

    impl Leaf {
        fn new(index: usize) -> Arc<Self> {
            Arc::new(Self {
                label: SingleValueCache::new(move || format!("leaf-{index}")),
                sizes: KeyedCache::new(|n: &u32| *n as usize * 2),
            })
        }

        fn warm(&self) {
            self.label.value();
            self.sizes.get(&3);
        }

        fn is_cold(&self) -> bool {
            !self.label.is_cached() && self.sizes.is_empty()
        }
    }

    impl CacheGraph for Leaf {
        fn describe(fields: &mut FieldSet<Self>) {
            fields
                .cache("label", |leaf| &leaf.label)
                .cache("sizes", |leaf| &leaf.sizes);
        }
    }

    struct Tree {
        title: SingleValueCache<String>,
        depth: SingleValueCacheByValue<u32>,
        children: IndexedCache<Arc<Leaf>>,
        lookup: Option<KeyedCache<u8, Arc<Leaf>>>,
        registry: Option<CacheRegistry>,
    }

    impl CacheGraph for Tree {
        fn describe(fields: &mut FieldSet<Self>) {
            fields
                .cache("title", |tree| &tree.title)
                .cache("depth", |tree| &tree.depth)
                .nested("children", |tree| &tree.children)
                .optional_nested("lookup", |tree| tree.lookup.as_ref())
                .optional_cache("registry", |tree| tree.registry.as_ref());
        }
    }

    fn tree(lookup: bool) -> Tree {
        Tree {
            title: SingleValueCache::new(|| "root".to_string()),
            depth: SingleValueCacheByValue::new(|| 2),
            children: IndexedCache::new(3, Leaf::new),
            lookup: lookup.then(|| KeyedCache::new(|k: &u8| Leaf::new(usize::from(*k)))),
            registry: None,
        }
    }

    #[test]
    fn test_clears_shared_and_inline_fields() {
        init_tracing();
        let mut root = tree(false);
        root.title.value();
        root.depth.value();

        invalidate_graph_in_place(&mut root);
        assert!(!root.title.is_cached());
        assert!(!root.depth.is_cached());
    }

    #[test]
    fn test_recurses_into_cached_elements() {
        let root = tree(true);
        let first = root.children.get(0);
        let second = root.children.get(2);
        let looked_up = root.lookup.as_ref().unwrap().get(&9);
        for leaf in [&first, &second, &looked_up] {
            leaf.warm();
        }

        invalidate_graph(Some(&root));

        assert!(first.is_cold());
        assert!(second.is_cold());
        assert!(looked_up.is_cold());
        assert_eq!(root.children.cached_len(), 0);
        assert!(root.lookup.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_absent_roots_and_fields_are_skipped() {
        invalidate_graph::<Tree>(None);

        let root = tree(false);
        root.title.value();
        invalidate_graph(Some(&root));
        assert!(!root.title.is_cached());
    }

    #[test]
    fn test_optional_registry_field() {
        let registry = CacheRegistry::new();
        let tracked = registry.create_single(|| 1u8);
        tracked.value();

        let root = Tree {
            registry: Some(registry.clone()),
            ..tree(false)
        };
        invalidate_graph(Some(&root));

        assert!(!tracked.is_cached());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_plan_is_memoized() {
        let first = plan_for::<Tree>();
        let second = plan_for::<Tree>();
        assert!(std::ptr::eq(first, second));
        assert!(first.type_name().ends_with("Tree"));

        let fields: Vec<FieldInfo> = first.fields().collect();
        let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["title", "depth", "children", "lookup", "registry"]);

        assert_eq!(fields[0].storage, Storage::Shared);
        assert_eq!(fields[1].storage, Storage::Inline);
        assert!(fields[2].recursive && !fields[2].optional);
        assert!(fields[3].recursive && fields[3].optional);
        assert!(!fields[4].recursive && fields[4].optional);
    }

    #[derive(Clone)]
    struct Inline {
        hits: SingleValueCacheByValue<u32>,
        total: ContextualValueCache<u32, u32>,
    }

    impl CacheGraph for Inline {
        fn describe(fields: &mut FieldSet<Self>) {
            fields
                .cache("hits", |v| &v.hits)
                .cache("total", |v| &v.total);
        }
    }

    fn double(n: &u32) -> u32 {
        n * 2
    }

    #[test]
    fn test_value_root_in_place() {
        let mut root = Inline {
            hits: SingleValueCacheByValue::new(|| 1),
            total: ContextualValueCache::new(21, double),
        };
        assert_eq!(root.hits.value(), 1);
        assert_eq!(root.total.value(), 42);

        invalidate_graph_in_place(&mut root);
        assert!(!root.hits.is_cached());
        assert!(!root.total.is_cached());
    }

    #[test]
    fn test_invalidating_a_copy_leaves_the_original_cached() {
        let root = Inline {
            hits: SingleValueCacheByValue::new(|| 1),
            total: ContextualValueCache::new(21, double),
        };
        root.hits.value();
        root.total.value();

        invalidate_graph_in_place(&mut root.clone());

        assert!(root.hits.is_cached());
        assert!(root.total.is_cached());
    }
}

//! Cross-module type refinement.
//!
//! In a multiplatform build a common module may declare `expect` types whose
//! platform modules provide the `actual` counterparts. Refining a type means
//! substituting the platform counterpart as seen from a given module. Since
//! refinement is expensive and asked for repeatedly, each module that has
//! refinement enabled owns a [`RealRefinementCache`]. Modules without one are
//! bound to the stateless empty variant, which makes every refinement a no-op
//! without call sites having to check a flag.

use std::{hash::Hash, sync::Arc};

use crate::{
    cache::{SyncCache, SyncMemoizedFunction},
    intern::InternedSymbol,
};

/// The types a refinement cache is keyed by.
pub trait RefinementTypes {
    type TypeConstructor: Eq + Hash + Clone;
    type Type: Eq + Hash + Clone;
    type Class: Eq + Hash + Clone;
    type Scope: Clone;
}

/// Memoized refinement results of one module. Shared between threads.
pub struct RealRefinementCache<R: RefinementTypes> {
    refinement_needed: SyncMemoizedFunction<R::TypeConstructor, bool>,
    refined_types: SyncCache<R::Type, R::Type>,
    class_scopes: SyncCache<R::Class, R::Scope>,
}

impl<R: RefinementTypes> RealRefinementCache<R> {
    /// `refinement_needed` decides, once per type constructor, whether types
    /// built from it may need refinement at all.
    pub fn new(
        refinement_needed: impl Fn(&R::TypeConstructor) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            refinement_needed: SyncMemoizedFunction::new(refinement_needed),
            refined_types: SyncCache::new(),
            class_scopes: SyncCache::new(),
        }
    }

    pub fn cached_type_count(&self) -> usize {
        self.refined_types.len()
    }

    pub fn cached_scope_count(&self) -> usize {
        self.class_scopes.len()
    }
}

impl<R: RefinementTypes> core::fmt::Debug for RealRefinementCache<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealRefinementCache")
            .field("refined_types", &self.refined_types.len())
            .field("class_scopes", &self.class_scopes.len())
            .finish_non_exhaustive()
    }
}

/// The refinement cache bound to a module.
pub enum RefinementCache<R: RefinementTypes> {
    Real(Arc<RealRefinementCache<R>>),
    /// Refinement is disabled: nothing needs refinement, types are returned
    /// as-is and scopes are recomputed on every request.
    Empty,
}

impl<R: RefinementTypes> RefinementCache<R> {
    pub fn is_real(&self) -> bool {
        matches!(self, RefinementCache::Real(_))
    }

    pub fn is_refinement_needed_for_type_constructor(
        &self,
        constructor: &R::TypeConstructor,
    ) -> bool {
        match self {
            RefinementCache::Real(cache) => cache.refinement_needed.call(constructor.clone()),
            RefinementCache::Empty => false,
        }
    }

    /// Returns the cached refinement of `ty`, computing it with `refinement`
    /// on first request. When `refinement` yields nothing, `ty` itself is
    /// returned and nothing is cached.
    pub fn refine_or_get_type(
        &self,
        ty: &R::Type,
        refinement: impl FnOnce() -> Option<R::Type>,
    ) -> R::Type {
        match self {
            RefinementCache::Real(cache) => cache
                .refined_types
                .get_or_compute_optional(ty.clone(), |_| refinement())
                .unwrap_or_else(|| ty.clone()),
            RefinementCache::Empty => ty.clone(),
        }
    }

    pub fn get_or_put_scope_for_class(
        &self,
        class: &R::Class,
        compute: impl FnOnce() -> R::Scope,
    ) -> R::Scope {
        match self {
            RefinementCache::Real(cache) => {
                cache.class_scopes.get_or_compute(class.clone(), |_| compute())
            }
            RefinementCache::Empty => compute(),
        }
    }
}

impl<R: RefinementTypes> Clone for RefinementCache<R> {
    fn clone(&self) -> Self {
        match self {
            RefinementCache::Real(cache) => RefinementCache::Real(cache.clone()),
            RefinementCache::Empty => RefinementCache::Empty,
        }
    }
}

impl<R: RefinementTypes> core::fmt::Debug for RefinementCache<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefinementCache::Real(cache) => f.debug_tuple("Real").field(cache).finish(),
            RefinementCache::Empty => f.write_str("Empty"),
        }
    }
}

/// A module as seen by type refinement. Whether refinement is enabled is
/// decided once, when the module is created.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor<R: RefinementTypes> {
    name: InternedSymbol,
    refinement: RefinementCache<R>,
}

impl<R: RefinementTypes> ModuleDescriptor<R> {
    /// A module without a real cache has refinement disabled.
    pub fn new(name: InternedSymbol, cache: Option<Arc<RealRefinementCache<R>>>) -> Self {
        Self {
            name,
            refinement: cache.map_or(RefinementCache::Empty, RefinementCache::Real),
        }
    }

    pub fn name(&self) -> InternedSymbol {
        self.name
    }

    pub fn refinement_cache(&self) -> &RefinementCache<R> {
        &self.refinement
    }

    pub fn is_refinement_needed_for_type_constructor(
        &self,
        constructor: &R::TypeConstructor,
    ) -> bool {
        self.refinement
            .is_refinement_needed_for_type_constructor(constructor)
    }

    /// `refinement` is handed this module, the module the type is seen from.
    pub fn refine_or_get_type(
        &self,
        ty: &R::Type,
        refinement: impl FnOnce(&Self) -> Option<R::Type>,
    ) -> R::Type {
        self.refinement.refine_or_get_type(ty, || refinement(self))
    }

    pub fn get_or_put_scope_for_class(
        &self,
        class: &R::Class,
        compute: impl FnOnce() -> R::Scope,
    ) -> R::Scope {
        self.refinement.get_or_put_scope_for_class(class, compute)
    }
}

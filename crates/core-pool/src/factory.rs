//! Resource factory seam
//!
//! The pool never talks to a backend itself. Everything protocol-specific
//! (handshakes, authentication, liveness probes) lives behind
//! [`ResourceFactory`], implemented by the embedding application.

use crate::error::FactoryError;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

/// Factory trait for creating, matching and destroying pooled resources
///
/// All methods are called from caller threads or sweep threads and may block;
/// the pool never holds its own lock across `create`, `cleanup` or `destroy`.
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource (e.g. a backend connection)
    type Resource: Send + 'static;

    /// Caller identity a resource is bound to
    type Principal: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Request criteria a resource must satisfy
    type Criteria: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Create a new resource for the given identity and criteria
    fn create(
        &self,
        principal: Option<&Self::Principal>,
        criteria: &Self::Criteria,
    ) -> Result<Self::Resource, FactoryError>;

    /// Check whether an idle resource can serve this request
    ///
    /// `Ok(false)` is a plain non-match; an error is treated the same way.
    fn matches(
        &self,
        resource: &Self::Resource,
        principal: Option<&Self::Principal>,
        criteria: &Self::Criteria,
    ) -> Result<bool, FactoryError>;

    /// Reset per-lease state before a resource goes back to the idle list
    ///
    /// A failure here causes the resource to be destroyed instead.
    fn cleanup(&self, _resource: &mut Self::Resource) -> Result<(), FactoryError> {
        Ok(())
    }

    /// Release the backend side of a resource (best effort)
    fn destroy(&self, resource: Self::Resource) -> Result<(), FactoryError> {
        drop(resource);
        Ok(())
    }

    /// Whether resources take part in transactions
    fn is_transactional(&self) -> bool {
        false
    }
}

/// Optional capability: bulk validation of idle resources
pub trait ValidatingFactory: ResourceFactory {
    /// Return the indices of `candidates` that are no longer usable
    fn invalid_resources(&self, candidates: &[&Self::Resource]) -> Vec<usize>;
}

/// Bulk validation callback captured at construction time
pub type ValidateFn<R> = dyn Fn(&[&R]) -> Vec<usize> + Send + Sync;

/// Validation capability of a factory, fixed when the pool factory is built
pub enum Validation<R> {
    /// Background validation is unsupported
    NonValidating,
    /// Background validation delegates to this callback
    Validating(Box<ValidateFn<R>>),
}

impl<R> Debug for Validation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::NonValidating => f.write_str("NonValidating"),
            Validation::Validating(_) => f.write_str("Validating"),
        }
    }
}

/// A [`ResourceFactory`] paired with its validation capability
///
/// Shared by every pool a router creates.
pub struct PoolFactory<F: ResourceFactory> {
    factory: Arc<F>,
    validation: Validation<F::Resource>,
}

impl<F: ResourceFactory> PoolFactory<F> {
    /// Wrap a factory that cannot validate idle resources
    pub fn non_validating(factory: Arc<F>) -> Self {
        Self {
            factory,
            validation: Validation::NonValidating,
        }
    }

    /// Wrap a factory whose idle resources are checked by the background validator
    pub fn validating(factory: Arc<F>) -> Self
    where
        F: ValidatingFactory,
    {
        let validator = factory.clone();
        Self {
            factory,
            validation: Validation::Validating(Box::new(move |candidates| {
                validator.invalid_resources(candidates)
            })),
        }
    }

    /// The wrapped factory
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The validation capability
    pub fn validation(&self) -> &Validation<F::Resource> {
        &self.validation
    }

    /// Whether background validation can do anything
    pub fn supports_validation(&self) -> bool {
        matches!(self.validation, Validation::Validating(_))
    }
}

impl<F: ResourceFactory> Debug for PoolFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolFactory")
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

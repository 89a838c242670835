//! Datasource registrations and dependency injection.
//!
//! Checks declare their dependencies as an ordered parameter list; the
//! registry turns that list into a signature plan at registration time and
//! walks the plan at execution time. Instances are singletons per
//! (type, factory-args) tuple, created lazily and memoized for the engine's
//! lifetime.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::environment::Environment;
use crate::error::{CheckError, ConfigurationError, ConfigurationErrors};
use crate::result::CheckId;
use crate::scheduling::SchedulingStrategy;

/// A dependency injected into checks: a client, a connection, a handle.
///
/// Implementations are responsible for their own internal concurrency
/// safety; one instance is shared by every check that depends on it.
pub trait Datasource: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Call-site arguments for factory-produced datasources.
///
/// Part of the instance identity: the same factory invoked with the same
/// arguments yields the same memoized instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FactoryArgs {
    args: Vec<String>,
    kwargs: BTreeMap<String, String>,
}

impl FactoryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn kwarg_value(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).map(String::as_str)
    }
}

impl fmt::Display for FactoryArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.args.clone();
        parts.extend(self.kwargs.iter().map(|(k, v)| format!("{k}={v}")));
        write!(f, "{}", parts.join(", "))
    }
}

/// Builds datasource instances parameterised at the call site.
pub trait DatasourceFactory: Send + Sync + 'static {
    fn build(&self, args: &FactoryArgs) -> Result<Arc<dyn Datasource>, CheckError>;
}

/// One parameter of a check's callable signature.
#[derive(Clone)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
}

#[derive(Clone)]
enum ParamKind {
    Environment,
    Datasource {
        ty: TypeId,
        ty_name: &'static str,
    },
    FromFactory {
        factory: TypeId,
        factory_name: &'static str,
        args: FactoryArgs,
    },
}

impl ParamSpec {
    /// Inject the current target environment.
    pub fn environment(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Environment,
        }
    }

    /// Inject the direct registration of `T`.
    pub fn datasource<T: Datasource>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Datasource {
                ty: TypeId::of::<T>(),
                ty_name: std::any::type_name::<T>(),
            },
        }
    }

    /// Inject an instance produced by factory `F` with the given arguments.
    pub fn from_factory<F: DatasourceFactory>(name: impl Into<String>, args: FactoryArgs) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::FromFactory {
                factory: TypeId::of::<F>(),
                factory_name: std::any::type_name::<F>(),
                args,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short type label used by `list-checks`.
    pub fn type_label(&self) -> String {
        fn short(full: &str) -> &str {
            full.rsplit("::").next().unwrap_or(full)
        }
        match &self.kind {
            ParamKind::Environment => "Environment".to_string(),
            ParamKind::Datasource { ty_name, .. } => short(ty_name).to_string(),
            ParamKind::FromFactory { factory_name, .. } => short(factory_name).to_string(),
        }
    }
}

/// Identity of a memoized instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InstanceKey {
    Direct(TypeId),
    Factory(TypeId, FactoryArgs),
}

/// A resolved parameter binding.
#[derive(Debug, Clone)]
struct PlanBinding {
    name: String,
    type_label: String,
    target: BindingTarget,
}

#[derive(Debug, Clone)]
enum BindingTarget {
    Environment,
    Instance(InstanceKey),
}

/// The registration-time description of what to inject where for one check.
#[derive(Debug, Clone, Default)]
pub struct SignaturePlan {
    bindings: Vec<PlanBinding>,
}

impl SignaturePlan {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// `(name, type)` pairs in declaration order, for diagnostics and the
    /// CLI listing.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings
            .iter()
            .map(|b| (b.name.as_str(), b.type_label.as_str()))
    }
}

struct DirectRegistration {
    type_name: &'static str,
    strategies: Vec<Arc<dyn SchedulingStrategy>>,
    construct: Box<dyn Fn() -> Result<Arc<dyn Datasource>, CheckError> + Send + Sync>,
}

struct FactoryRegistration {
    strategies: Vec<Arc<dyn SchedulingStrategy>>,
    factory: Box<dyn DatasourceFactory>,
}

/// Maps datasource types to instantiation recipes and resolves injection
/// plans per check.
#[derive(Default)]
pub struct DatasourceRegistry {
    direct: HashMap<TypeId, DirectRegistration>,
    factories: HashMap<TypeId, FactoryRegistration>,
    instances: DashMap<InstanceKey, Arc<dyn Datasource>>,
}

impl DatasourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a direct constructor for `T`. Construction arguments are
    /// captured by the closure, so one registration exists per type.
    pub fn register<T, F>(&mut self, construct: F)
    where
        T: Datasource,
        F: Fn() -> Result<T, CheckError> + Send + Sync + 'static,
    {
        self.register_with_strategies(construct, Vec::new());
    }

    /// Register a direct constructor together with scheduling strategies
    /// that every dependent check inherits.
    pub fn register_with_strategies<T, F>(
        &mut self,
        construct: F,
        strategies: Vec<Arc<dyn SchedulingStrategy>>,
    ) where
        T: Datasource,
        F: Fn() -> Result<T, CheckError> + Send + Sync + 'static,
    {
        self.direct.insert(
            TypeId::of::<T>(),
            DirectRegistration {
                type_name: std::any::type_name::<T>(),
                strategies,
                construct: Box::new(move || construct().map(|ds| Arc::new(ds) as Arc<dyn Datasource>)),
            },
        );
    }

    /// Register a factory. Checks reference it through
    /// [`ParamSpec::from_factory`].
    pub fn register_factory<F: DatasourceFactory>(&mut self, factory: F) {
        self.register_factory_with_strategies(factory, Vec::new());
    }

    pub fn register_factory_with_strategies<F: DatasourceFactory>(
        &mut self,
        factory: F,
        strategies: Vec<Arc<dyn SchedulingStrategy>>,
    ) {
        self.factories.insert(
            TypeId::of::<F>(),
            FactoryRegistration {
                strategies,
                factory: Box::new(factory),
            },
        );
    }

    /// Resolve a check's parameter list into a signature plan, collecting
    /// the scheduling strategies declared on every referenced registration.
    ///
    /// Every unresolvable parameter is reported; the check fails
    /// registration if any binding is missing.
    pub fn resolve_plan(
        &self,
        check: &CheckId,
        params: &[ParamSpec],
    ) -> Result<(SignaturePlan, Vec<Arc<dyn SchedulingStrategy>>), ConfigurationErrors> {
        let mut errors = ConfigurationErrors::new();
        let mut bindings = Vec::with_capacity(params.len());
        let mut strategies = Vec::new();

        for param in params {
            let target = match &param.kind {
                ParamKind::Environment => Some(BindingTarget::Environment),
                ParamKind::Datasource { ty, ty_name } => match self.direct.get(ty) {
                    Some(reg) => {
                        strategies.extend(reg.strategies.iter().cloned());
                        Some(BindingTarget::Instance(InstanceKey::Direct(*ty)))
                    }
                    None => {
                        errors.push(ConfigurationError::UnresolvedDatasource {
                            check: check.to_string(),
                            param: param.name.clone(),
                            ty: (*ty_name).to_string(),
                        });
                        None
                    }
                },
                ParamKind::FromFactory {
                    factory,
                    factory_name,
                    args,
                } => match self.factories.get(factory) {
                    Some(reg) => {
                        strategies.extend(reg.strategies.iter().cloned());
                        Some(BindingTarget::Instance(InstanceKey::Factory(
                            *factory,
                            args.clone(),
                        )))
                    }
                    None => {
                        errors.push(ConfigurationError::UnresolvedFactory {
                            check: check.to_string(),
                            param: param.name.clone(),
                            ty: (*factory_name).to_string(),
                        });
                        None
                    }
                },
            };

            if let Some(target) = target {
                bindings.push(PlanBinding {
                    name: param.name.clone(),
                    type_label: param.type_label(),
                    target,
                });
            }
        }

        errors.into_result()?;
        Ok((SignaturePlan { bindings }, strategies))
    }

    /// Walk a plan with the current target environment substituted for
    /// environment parameters, constructing instances on first use.
    pub fn instantiate(
        &self,
        plan: &SignaturePlan,
        target_environment: &Environment,
    ) -> Result<Injected, CheckError> {
        let mut values = Vec::with_capacity(plan.bindings.len());
        for binding in &plan.bindings {
            let value = match &binding.target {
                BindingTarget::Environment => {
                    InjectedValue::Environment(target_environment.clone())
                }
                BindingTarget::Instance(key) => {
                    InjectedValue::Datasource(self.instance(key)?)
                }
            };
            values.push(value);
        }
        Ok(Injected { values })
    }

    fn instance(&self, key: &InstanceKey) -> Result<Arc<dyn Datasource>, CheckError> {
        match self.instances.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(slot) => {
                let instance = match key {
                    InstanceKey::Direct(ty) => {
                        let reg = self.direct.get(ty).ok_or_else(|| {
                            CheckError::failed("datasource registration disappeared")
                        })?;
                        tracing::debug!(datasource = reg.type_name, "Constructing datasource");
                        (reg.construct)()?
                    }
                    InstanceKey::Factory(factory, args) => {
                        let reg = self.factories.get(factory).ok_or_else(|| {
                            CheckError::failed("factory registration disappeared")
                        })?;
                        tracing::debug!(args = %args, "Building datasource from factory");
                        reg.factory.build(args)?
                    }
                };
                slot.insert(instance.clone());
                Ok(instance)
            }
        }
    }

    /// Drop all memoized instances. Called on engine shutdown.
    pub fn clear_instances(&self) {
        self.instances.clear();
    }
}

/// Resolved argument pack handed to a check function, in plan order.
#[derive(Clone)]
pub struct Injected {
    values: Vec<InjectedValue>,
}

#[derive(Clone)]
pub enum InjectedValue {
    Environment(Environment),
    Datasource(Arc<dyn Datasource>),
}

impl Injected {
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self { values: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The environment bound at position `idx`.
    pub fn environment(&self, idx: usize) -> Option<&Environment> {
        match self.values.get(idx)? {
            InjectedValue::Environment(env) => Some(env),
            InjectedValue::Datasource(_) => None,
        }
    }

    /// The first environment parameter, wherever it was declared.
    pub fn target_environment(&self) -> Option<&Environment> {
        self.values.iter().find_map(|v| match v {
            InjectedValue::Environment(env) => Some(env),
            InjectedValue::Datasource(_) => None,
        })
    }

    /// The datasource bound at position `idx`, downcast to its concrete
    /// type.
    pub fn datasource<T: Datasource>(&self, idx: usize) -> Option<&T> {
        match self.values.get(idx)? {
            InjectedValue::Datasource(ds) => ds.as_any().downcast_ref::<T>(),
            InjectedValue::Environment(_) => None,
        }
    }
}

//! Target-network synchronization.
//!
//! Parameters live in namespaced sets ("policy", "target"). Synchronization
//! matches parameters by name after stripping each namespace prefix, checks
//! the whole pairing, and only then copies every policy value into the
//! target set.

use tracing::{info, warn};

use crate::error::{Result, ValueError};

/// Namespace of the trained parameter set.
pub const POLICY_NAMESPACE: &str = "policy";
/// Namespace of the bootstrap parameter set.
pub const TARGET_NAMESPACE: &str = "target";

/// A named collection of parameters belonging to one namespace.
pub trait ParameterSet {
    type Value;

    /// Namespace prefix of every parameter name.
    fn namespace(&self) -> &str;

    /// Fully qualified parameter names.
    fn names(&self) -> Vec<String>;

    fn get(&self, name: &str) -> Option<Self::Value>;

    /// Whether `value` can be written into `name` (same shape).
    fn compatible(&self, _name: &str, _value: &Self::Value) -> bool {
        true
    }

    fn assign(&mut self, name: &str, value: &Self::Value) -> Result<()>;
}

/// Running statistics and step counters that are never copied.
pub fn is_running_statistic(name: &str) -> bool {
    let leaf = name.rsplit(['.', '/']).next().unwrap_or(name);
    matches!(
        leaf,
        "running_mean" | "running_var" | "num_batches_tracked" | "local_step" | "biased"
    )
}

/// Removes the namespace prefix and the separator that follows it.
fn strip_namespace<'a>(name: &'a str, namespace: &str) -> &'a str {
    name.strip_prefix(namespace)
        .map(|rest| rest.trim_start_matches(['.', '/']))
        .unwrap_or(name)
}

/// One-shot bulk copy of policy parameters into target parameters.
#[derive(Debug, Clone, Copy)]
pub struct TargetSynchronizer {
    exclude: fn(&str) -> bool,
}

impl Default for TargetSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSynchronizer {
    /// Synchronizer excluding batch-norm statistics and step counters.
    pub fn new() -> Self {
        Self {
            exclude: is_running_statistic,
        }
    }

    /// Synchronizer with a custom exclusion predicate.
    pub fn with_exclusion(exclude: fn(&str) -> bool) -> Self {
        Self { exclude }
    }

    fn filtered<P: ParameterSet + ?Sized>(&self, set: &P) -> Vec<String> {
        let mut names: Vec<String> = set
            .names()
            .into_iter()
            .filter(|n| !(self.exclude)(n))
            .collect();
        names.sort_by(|a, b| {
            strip_namespace(a, set.namespace()).cmp(strip_namespace(b, set.namespace()))
        });
        names
    }

    /// Pairs policy and target names.
    ///
    /// # Errors
    ///
    /// [`ValueError::ParameterCountMismatch`] or
    /// [`ValueError::ParameterNameMismatch`] if the sets do not line up.
    pub fn plan<P, T>(&self, policy: &P, target: &T) -> Result<Vec<(String, String)>>
    where
        P: ParameterSet + ?Sized,
        T: ParameterSet + ?Sized,
    {
        let policy_names = self.filtered(policy);
        let target_names = self.filtered(target);
        if policy_names.len() != target_names.len() {
            warn!(
                policy = policy_names.len(),
                target = target_names.len(),
                "target/policy parameter count mismatch"
            );
            return Err(ValueError::ParameterCountMismatch {
                policy: policy_names.len(),
                target: target_names.len(),
            });
        }

        policy_names
            .into_iter()
            .zip(target_names)
            .map(|(p, t)| {
                if strip_namespace(&p, policy.namespace()) != strip_namespace(&t, target.namespace())
                {
                    warn!(policy = %p, target = %t, "target/policy parameter name mismatch");
                    return Err(ValueError::ParameterNameMismatch {
                        policy: p,
                        target: t,
                    });
                }
                Ok((p, t))
            })
            .collect()
    }

    /// Copies every matched policy parameter into the target set.
    ///
    /// All checks run before the first assignment, so on error the target
    /// set is untouched. Returns the number of copied parameters.
    pub fn synchronize<P, T, V>(&self, policy: &P, target: &mut T) -> Result<usize>
    where
        P: ParameterSet<Value = V> + ?Sized,
        T: ParameterSet<Value = V> + ?Sized,
    {
        let pairs = self.plan(policy, &*target)?;

        let mut staged = Vec::with_capacity(pairs.len());
        for (p, t) in &pairs {
            let value = policy
                .get(p)
                .ok_or_else(|| ValueError::MissingParameter(p.clone()))?;
            if !target.compatible(t, &value) {
                return Err(ValueError::ShapeMismatch(format!(
                    "parameter {p} does not fit {t}"
                )));
            }
            staged.push((t, value));
        }

        for (t, value) in &staged {
            target.assign(t, value)?;
        }
        info!(
            parameters = staged.len(),
            from = policy.namespace(),
            to = target.namespace(),
            "synchronized target parameters"
        );
        Ok(staged.len())
    }
}

#[cfg(feature = "nn")]
mod var_store {
    use tch::{nn, Device, Tensor};

    use super::ParameterSet;
    use crate::error::{Result, ValueError};

    /// A `tch` variable store whose variables all live under one namespace.
    pub struct NamespacedVarStore {
        namespace: String,
        vs: nn::VarStore,
    }

    impl NamespacedVarStore {
        pub fn new(namespace: &str, device: Device) -> Self {
            Self {
                namespace: namespace.to_string(),
                vs: nn::VarStore::new(device),
            }
        }

        /// Root path for building modules inside the namespace.
        pub fn path(&self) -> nn::Path<'_> {
            self.vs.root() / self.namespace.as_str()
        }

        pub fn var_store(&self) -> &nn::VarStore {
            &self.vs
        }
    }

    impl ParameterSet for NamespacedVarStore {
        type Value = Tensor;

        fn namespace(&self) -> &str {
            &self.namespace
        }

        fn names(&self) -> Vec<String> {
            self.vs.variables().into_keys().collect()
        }

        fn get(&self, name: &str) -> Option<Tensor> {
            self.vs.variables().remove(name)
        }

        fn compatible(&self, name: &str, value: &Tensor) -> bool {
            self.get(name).is_some_and(|t| t.size() == value.size())
        }

        fn assign(&mut self, name: &str, value: &Tensor) -> Result<()> {
            let mut var = self
                .get(name)
                .ok_or_else(|| ValueError::MissingParameter(name.to_string()))?;
            tch::no_grad(|| var.f_copy_(value))?;
            Ok(())
        }
    }
}

#[cfg(feature = "nn")]
pub use var_store::NamespacedVarStore;

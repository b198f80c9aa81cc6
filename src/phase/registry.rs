use std::{collections::BTreeSet, sync::Arc};

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use super::{Phase, PhaseDescriptor, PhaseId, PhaseKind};
use crate::{
    config::{ALL_PHASES, ConfigKey, Configuration},
    error::{PipelineError, Result},
    index::{Index, IndexVec},
};

/// Collects phase declarations in pipeline order. Nothing is validated until
/// [`PhaseRegistryBuilder::build`].
#[derive(Debug, Default)]
pub struct PhaseRegistryBuilder {
    phases: Vec<PhaseDescriptor>,
}

impl PhaseRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        prerequisites: &[PhaseId],
    ) -> PhaseId {
        self.push(name, description, PhaseKind::Regular, prerequisites)
    }

    pub fn start_marker(&mut self, name: &str, description: &str) -> PhaseId {
        self.push(name, description, PhaseKind::StartMarker, &[])
    }

    pub fn end_marker(
        &mut self,
        name: &str,
        description: &str,
        prerequisites: &[PhaseId],
    ) -> PhaseId {
        self.push(name, description, PhaseKind::EndMarker, prerequisites)
    }

    fn push(
        &mut self,
        name: &str,
        description: &str,
        kind: PhaseKind,
        prerequisites: &[PhaseId],
    ) -> PhaseId {
        let id = PhaseId::new(self.phases.len());

        self.phases.push(PhaseDescriptor {
            id,
            name: name.to_owned(),
            description: description.to_owned(),
            kind,
            prerequisites: prerequisites.iter().copied().collect::<BTreeSet<_>>(),
        });

        id
    }

    /// Validates the declared phases and resolves every phase list in
    /// `config` against them.
    pub fn build(self, config: &Configuration) -> Result<PhaseRegistry> {
        let mut phases = IndexVec::new();
        let mut by_name = HashMap::new();

        for descriptor in self.phases {
            if by_name.contains_key(&descriptor.name) {
                return Err(PipelineError::DuplicatePhase {
                    name: descriptor.name,
                });
            }

            // Prerequisites may only point backward in pipeline order
            if descriptor
                .prerequisites
                .iter()
                .any(|prerequisite| *prerequisite >= descriptor.id)
            {
                return Err(PipelineError::InvalidPrerequisite {
                    phase: descriptor.name,
                });
            }

            by_name.insert(descriptor.name.clone(), descriptor.id);
            phases.push(Arc::new(descriptor));
        }

        let mut registry = PhaseRegistry {
            phases,
            by_name,
            enabled: HashSet::new(),
            verbose: HashSet::new(),
            dump_before: HashSet::new(),
            dump_after: HashSet::new(),
        };

        let disabled = registry.resolve_selection(config.names(ConfigKey::DisablePhases))?;
        let dump_around = registry.resolve_selection(config.names(ConfigKey::Dump))?;

        registry.enabled = registry
            .phases
            .indices()
            .filter(|id| !disabled.contains(id))
            .collect();
        registry.verbose = registry.resolve_selection(config.names(ConfigKey::VerbosePhases))?;
        registry.dump_before = registry
            .resolve_selection(config.names(ConfigKey::DumpBefore))?
            .union(&dump_around)
            .copied()
            .collect();
        registry.dump_after = registry
            .resolve_selection(config.names(ConfigKey::DumpAfter))?
            .union(&dump_around)
            .copied()
            .collect();

        debug!(
            phases = registry.len(),
            enabled = registry.enabled.len(),
            "built phase registry"
        );

        Ok(registry)
    }
}

/// The full ordered list of phases of a pipeline along with the subsets
/// selected by configuration. Read-only once built.
#[derive(Debug)]
pub struct PhaseRegistry {
    phases: IndexVec<PhaseId, Arc<PhaseDescriptor>>,
    by_name: HashMap<String, PhaseId>,
    enabled: HashSet<PhaseId>,
    verbose: HashSet<PhaseId>,
    dump_before: HashSet<PhaseId>,
    dump_after: HashSet<PhaseId>,
}

impl PhaseRegistry {
    pub fn builder() -> PhaseRegistryBuilder {
        PhaseRegistryBuilder::new()
    }

    pub fn resolve(&self, name: &str) -> Result<PhaseId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownPhase {
                name: name.to_owned(),
            })
    }

    pub fn get(&self, id: PhaseId) -> Option<&PhaseDescriptor> {
        self.phases.get(id).map(|descriptor| &**descriptor)
    }

    /// Binds a body to a registered phase.
    pub fn bind<C, D>(
        &self,
        id: PhaseId,
        body: impl Fn(&C, D) -> Result<D> + 'static,
    ) -> Result<Phase<C, D>> {
        let descriptor = self
            .phases
            .get(id)
            .ok_or_else(|| PipelineError::UnknownPhase {
                name: format!("#{}", id.index()),
            })?;

        Ok(Phase::new(descriptor.clone(), Box::new(body)))
    }

    /// Whether `phase` was bound by this registry, as opposed to another
    /// registry that happens to use the same ids.
    pub fn owns<C, D>(&self, phase: &Phase<C, D>) -> bool {
        self.phases
            .get(phase.id())
            .is_some_and(|descriptor| Arc::ptr_eq(descriptor, &phase.descriptor))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseDescriptor> {
        self.phases.iter().map(|descriptor| &**descriptor)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn is_enabled(&self, id: PhaseId) -> bool {
        self.enabled.contains(&id)
    }

    pub fn is_verbose(&self, id: PhaseId) -> bool {
        self.verbose.contains(&id)
    }

    pub fn dumps_before(&self, id: PhaseId) -> bool {
        self.dump_before.contains(&id)
    }

    pub fn dumps_after(&self, id: PhaseId) -> bool {
        self.dump_after.contains(&id)
    }

    /// One entry per phase, in pipeline order.
    pub fn list(&self) -> Vec<PhaseListing> {
        self.iter()
            .map(|descriptor| PhaseListing {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                enabled: self.is_enabled(descriptor.id),
                verbose: self.is_verbose(descriptor.id),
            })
            .collect()
    }

    fn resolve_selection(&self, names: &[String]) -> Result<HashSet<PhaseId>> {
        if names.iter().any(|name| name == ALL_PHASES) {
            return Ok(self.phases.indices().collect());
        }

        names.iter().map(|name| self.resolve(name)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseListing {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub verbose: bool,
}

impl core::fmt::Display for PhaseListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line = format!(
            "{:<30} {:<50} {:<10} {}",
            format!("{}:", self.name),
            self.description,
            if self.enabled { "(Enabled)" } else { "" },
            if self.verbose { "(Verbose)" } else { "" },
        );

        f.write_str(line.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> PhaseRegistryBuilder {
        let mut builder = PhaseRegistry::builder();
        let a = builder.register("a", "Phase A", &[]);
        let b = builder.register("b", "Phase B", &[a]);
        builder.register("c", "Phase C", &[b]);
        builder
    }

    #[test]
    fn test_everything_enabled_by_default() {
        let registry = abc().build(&Configuration::new()).unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.iter().all(|phase| registry.is_enabled(phase.id)));
        assert!(registry.iter().all(|phase| !registry.is_verbose(phase.id)));
    }

    #[test]
    fn test_disabled_phases_partition_the_registry() {
        let config = Configuration::new().with_names(ConfigKey::DisablePhases, ["b"]);
        let registry = abc().build(&config).unwrap();

        let b = registry.resolve("b").unwrap();
        let enabled = registry
            .iter()
            .filter(|phase| registry.is_enabled(phase.id))
            .count();

        assert!(!registry.is_enabled(b));
        assert_eq!(enabled + 1, registry.len());
    }

    #[test]
    fn test_all_sentinel_selects_every_phase() {
        let config = Configuration::new()
            .with_names(ConfigKey::VerbosePhases, [ALL_PHASES])
            .with_names(ConfigKey::DisablePhases, [ALL_PHASES]);
        let registry = abc().build(&config).unwrap();

        assert!(registry.iter().all(|phase| registry.is_verbose(phase.id)));
        assert!(registry.iter().all(|phase| !registry.is_enabled(phase.id)));
    }

    #[test]
    fn test_dump_sets_include_dump_around() {
        let config = Configuration::new()
            .with_names(ConfigKey::DumpBefore, ["a"])
            .with_names(ConfigKey::DumpAfter, ["c"])
            .with_names(ConfigKey::Dump, ["b"]);
        let registry = abc().build(&config).unwrap();
        let [a, b, c] = ["a", "b", "c"].map(|name| registry.resolve(name).unwrap());

        assert!(registry.dumps_before(a) && !registry.dumps_after(a));
        assert!(registry.dumps_before(b) && registry.dumps_after(b));
        assert!(!registry.dumps_before(c) && registry.dumps_after(c));
    }

    #[test]
    fn test_unknown_configured_name_fails_construction() {
        let config = Configuration::new().with_names(ConfigKey::DumpAfter, ["nope"]);
        let error = abc().build(&config).unwrap_err();

        assert!(matches!(error, PipelineError::UnknownPhase { ref name } if name == "nope"));
        assert!(error.to_string().contains("--list-phases"));
    }

    #[test]
    fn test_duplicate_names_fail_construction() {
        let mut builder = abc();
        builder.register("a", "Another A", &[]);

        assert!(matches!(
            builder.build(&Configuration::new()),
            Err(PipelineError::DuplicatePhase { name }) if name == "a"
        ));
    }

    #[test]
    fn test_forward_prerequisites_are_rejected() {
        let mut builder = PhaseRegistry::builder();
        builder.register("early", "Early", &[PhaseId::new(1)]);
        builder.register("late", "Late", &[]);

        assert!(matches!(
            builder.build(&Configuration::new()),
            Err(PipelineError::InvalidPrerequisite { phase }) if phase == "early"
        ));
    }

    #[test]
    fn test_listing_has_one_aligned_line_per_phase() {
        let config = Configuration::new()
            .with_names(ConfigKey::DisablePhases, ["b"])
            .with_names(ConfigKey::VerbosePhases, ["c"]);
        let registry = abc().build(&config).unwrap();

        let lines = registry
            .list()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            format!("{:<30} {:<50} (Enabled)", "a:", "Phase A")
        );
        assert_eq!(lines[1], format!("{:<30} Phase B", "b:"));
        assert_eq!(
            lines[2],
            format!("{:<30} {:<50} (Enabled)  (Verbose)", "c:", "Phase C")
        );
    }

    #[test]
    fn test_bind_rejects_foreign_phases() {
        let registry = abc().build(&Configuration::new()).unwrap();
        let other = abc().build(&Configuration::new()).unwrap();

        let a = registry.resolve("a").unwrap();
        let phase = registry.bind(a, |_: &(), data: u32| Ok(data)).unwrap();

        assert!(registry.owns(&phase));
        assert!(!other.owns(&phase));
        assert!(registry.bind::<(), u32>(PhaseId::new(9), |_, d| Ok(d)).is_err());
    }
}

use hashbrown::HashSet;
use tracing::{debug, debug_span};

use super::{Phase, PhaseId, PhaseRegistry, PhaseRunner};
use crate::error::{PipelineError, Result};

/// Phases completed in one scope, linked to the enclosing scopes.
#[derive(Debug)]
struct PhaseScope<'p> {
    completed: HashSet<PhaseId>,
    parent: Option<&'p PhaseScope<'p>>,
    depth: usize,
}

impl<'p> PhaseScope<'p> {
    fn has_completed(&self, id: PhaseId) -> bool {
        self.completed.contains(&id) || self.parent.is_some_and(|parent| parent.has_completed(id))
    }
}

/// Schedules phases over one unit of IR.
///
/// Each manager tracks the phases run in its own scope. Child managers are
/// created for nested units and see everything their ancestors completed when
/// checking prerequisites, but never add to their ancestors' history.
///
/// A phase counts as completed as soon as it is entered, whether or not its
/// body then succeeds.
pub struct PhaseManager<'a, C, D> {
    context: &'a C,
    registry: &'a PhaseRegistry,
    data: D,
    runner: &'a dyn PhaseRunner<C, D>,
    scope: PhaseScope<'a>,
}

impl<'a, C, D> PhaseManager<'a, C, D> {
    pub fn new(
        context: &'a C,
        registry: &'a PhaseRegistry,
        data: D,
        runner: &'a dyn PhaseRunner<C, D>,
    ) -> Self {
        Self {
            context,
            registry,
            data,
            runner,
            scope: PhaseScope {
                completed: HashSet::new(),
                parent: None,
                depth: 0,
            },
        }
    }

    pub fn context(&self) -> &'a C {
        self.context
    }

    pub fn registry(&self) -> &'a PhaseRegistry {
        self.registry
    }

    /// The value this manager was created for.
    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn depth(&self) -> usize {
        self.scope.depth
    }

    /// Whether `id` ran in this scope or any enclosing one.
    pub fn has_completed(&self, id: PhaseId) -> bool {
        self.scope.has_completed(id)
    }

    /// Whether `id` ran in this scope itself.
    pub fn has_completed_locally(&self, id: PhaseId) -> bool {
        self.scope.completed.contains(&id)
    }

    /// Runs `phase` over `input` and returns the transformed tree.
    ///
    /// Disabled phases return `input` untouched and are not recorded. Fails
    /// with [`PipelineError::PrerequisiteNotMet`] when a prerequisite has not
    /// run in this scope or an enclosing one.
    pub fn phase(&mut self, phase: &Phase<C, D>, input: D) -> Result<D> {
        if !self.registry.owns(phase) {
            return Err(PipelineError::ForeignPhase {
                phase: phase.name().to_owned(),
            });
        }

        let descriptor = phase.descriptor();

        if !self.registry.is_enabled(descriptor.id) {
            debug!(phase = %descriptor.name, "skipping disabled phase");
            return Ok(input);
        }

        for prerequisite in &descriptor.prerequisites {
            if !self.scope.has_completed(*prerequisite) {
                let prerequisite = self
                    .registry
                    .get(*prerequisite)
                    .map_or_else(|| "<unknown>".to_owned(), |p| p.name.clone());

                return Err(PipelineError::PrerequisiteNotMet {
                    phase: descriptor.name.clone(),
                    prerequisite,
                });
            }
        }

        self.scope.completed.insert(descriptor.id);

        let _span = debug_span!("phase", name = %descriptor.name, depth = self.depth()).entered();

        self.runner.report_before(self.registry, descriptor, &input)?;
        let output = self
            .runner
            .run_body(self.registry, self.context, phase, input)?;
        self.runner.report_after(self.registry, descriptor, &output)?;

        Ok(output)
    }

    /// Opens a nested scope over `data`, run by `runner`.
    pub fn create_child<'b, D2>(
        &'b self,
        data: D2,
        runner: &'b dyn PhaseRunner<C, D2>,
    ) -> PhaseManager<'b, C, D2> {
        debug!(depth = self.depth() + 1, "creating child phase manager");

        PhaseManager {
            context: self.context,
            registry: self.registry,
            data,
            runner,
            scope: PhaseScope {
                completed: HashSet::new(),
                parent: Some(&self.scope),
                depth: self.depth() + 1,
            },
        }
    }

    /// Opens a nested scope over the same data with the same runner.
    pub fn create_nested(&self) -> PhaseManager<'_, C, D>
    where
        D: Clone,
    {
        self.create_child(self.data.clone(), self.runner)
    }
}

impl<C, D: core::fmt::Debug> core::fmt::Debug for PhaseManager<'_, C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseManager")
            .field("data", &self.data)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        config::{ConfigKey, Configuration},
        phase::{DefaultPhaseRunner, IrDump, MemorySink, PhaseContext},
    };

    #[derive(Default)]
    struct Context {
        verbose: Cell<bool>,
        invocations: Cell<usize>,
    }

    impl PhaseContext for Context {
        fn verbose_flag(&self) -> &Cell<bool> {
            &self.verbose
        }
    }

    impl IrDump for Vec<&'static str> {
        fn element_name(&self) -> String {
            "trace".to_owned()
        }

        fn dump(&self) -> String {
            self.join(",")
        }
    }

    type Trace = Vec<&'static str>;

    struct Pipeline {
        registry: PhaseRegistry,
        a: Phase<Context, Trace>,
        b: Phase<Context, Trace>,
        c: Phase<Context, Trace>,
    }

    fn pipeline(config: &Configuration) -> Pipeline {
        let mut builder = PhaseRegistry::builder();
        let a = builder.register("a", "Phase A", &[]);
        let b = builder.register("b", "Phase B", &[a]);
        let c = builder.register("c", "Phase C", &[b]);
        let registry = builder.build(config).unwrap();

        let append = |name: &'static str| {
            move |context: &Context, mut trace: Trace| {
                context.invocations.set(context.invocations.get() + 1);
                trace.push(name);
                Ok(trace)
            }
        };

        Pipeline {
            a: registry.bind(a, append("a")).unwrap(),
            b: registry.bind(b, append("b")).unwrap(),
            c: registry.bind(c, append("c")).unwrap(),
            registry,
        }
    }

    #[test]
    fn test_phases_in_order_succeed() {
        let pipeline = pipeline(&Configuration::new());
        let runner = DefaultPhaseRunner::new(&Configuration::new(), MemorySink::new());
        let context = Context::default();
        let mut manager = PhaseManager::new(&context, &pipeline.registry, Trace::new(), &runner);

        let trace = manager.phase(&pipeline.a, Trace::new()).unwrap();
        let trace = manager.phase(&pipeline.b, trace).unwrap();
        let trace = manager.phase(&pipeline.c, trace).unwrap();

        assert_eq!(trace, vec!["a", "b", "c"]);
        assert!(manager.has_completed_locally(pipeline.c.id()));
    }

    #[test]
    fn test_missing_prerequisite_names_both_phases() {
        let pipeline = pipeline(&Configuration::new());
        let runner = DefaultPhaseRunner::new(&Configuration::new(), MemorySink::new());
        let context = Context::default();
        let mut manager = PhaseManager::new(&context, &pipeline.registry, Trace::new(), &runner);

        let error = manager.phase(&pipeline.c, Trace::new()).unwrap_err();

        assert!(matches!(
            &error,
            PipelineError::PrerequisiteNotMet { phase, prerequisite }
                if phase == "c" && prerequisite == "b"
        ));
        assert_eq!(context.invocations.get(), 0);
        assert!(!manager.has_completed(pipeline.c.id()));
    }

    #[test]
    fn test_disabled_phase_is_skipped_and_not_recorded() {
        let config = Configuration::new().with_names(ConfigKey::DisablePhases, ["a"]);
        let pipeline = pipeline(&config);
        let runner = DefaultPhaseRunner::new(&config, MemorySink::new());
        let context = Context::default();
        let mut manager = PhaseManager::new(&context, &pipeline.registry, Trace::new(), &runner);

        let trace = manager.phase(&pipeline.a, vec!["input"]).unwrap();

        assert_eq!(trace, vec!["input"]);
        assert_eq!(context.invocations.get(), 0);
        assert!(!manager.has_completed(pipeline.a.id()));
        assert!(manager.phase(&pipeline.b, trace).is_err());
    }

    #[test]
    fn test_failed_phase_still_counts_as_attempted() {
        let mut builder = PhaseRegistry::builder();
        let flaky = builder.register("flaky", "Fails", &[]);
        let after = builder.register("after", "Runs after", &[flaky]);
        let registry = builder.build(&Configuration::new()).unwrap();
        let flaky = registry
            .bind(flaky, |_: &Context, _: Trace| {
                Err(PipelineError::Lowering("nope".to_owned()))
            })
            .unwrap();
        let after = registry.bind(after, |_: &Context, t: Trace| Ok(t)).unwrap();
        let runner = DefaultPhaseRunner::new(&Configuration::new(), MemorySink::new());
        let context = Context::default();
        let mut manager = PhaseManager::new(&context, &registry, Trace::new(), &runner);

        assert!(manager.phase(&flaky, Trace::new()).is_err());
        assert!(manager.phase(&after, Trace::new()).is_ok());
    }

    #[test]
    fn test_children_see_ancestors_but_not_siblings() {
        let pipeline = pipeline(&Configuration::new());
        let runner = DefaultPhaseRunner::new(&Configuration::new(), MemorySink::new());
        let context = Context::default();
        let mut root = PhaseManager::new(&context, &pipeline.registry, Trace::new(), &runner);

        root.phase(&pipeline.a, Trace::new()).unwrap();

        {
            let mut first = root.create_nested();
            first.phase(&pipeline.b, Trace::new()).unwrap();
            assert_eq!(first.depth(), 1);

            let mut grandchild = first.create_nested();
            assert_eq!(grandchild.depth(), 2);
            assert!(grandchild.has_completed(pipeline.b.id()));
            grandchild.phase(&pipeline.c, Trace::new()).unwrap();
        }

        let mut second = root.create_child(vec!["second"], &runner);
        assert!(!second.has_completed(pipeline.b.id()));
        assert!(second.phase(&pipeline.c, Trace::new()).is_err());
        assert!(!root.has_completed(pipeline.b.id()));
        assert_eq!(second.data(), &vec!["second"]);
    }

    #[test]
    fn test_foreign_phase_is_rejected() {
        let pipeline = pipeline(&Configuration::new());
        let other = self::pipeline(&Configuration::new());
        let runner = DefaultPhaseRunner::new(&Configuration::new(), MemorySink::new());
        let context = Context::default();
        let mut manager = PhaseManager::new(&context, &pipeline.registry, Trace::new(), &runner);

        assert!(matches!(
            manager.phase(&other.a, Trace::new()),
            Err(PipelineError::ForeignPhase { .. })
        ));
    }
}

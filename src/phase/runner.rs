use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::Write,
    path::Path,
    time::Instant,
};

use hashbrown::HashSet;
use parking_lot::Mutex;
use tracing::info;

use super::{Phase, PhaseDescriptor, PhaseKind, PhaseRegistry};
use crate::{
    config::{ConfigKey, Configuration},
    error::Result,
};

/// Trees that can be dumped around a phase.
pub trait IrDump {
    /// Name of the unit this tree represents (module name, function name, ...)
    fn element_name(&self) -> String;

    fn dump(&self) -> String;
}

/// Execution contexts expose a verbose flag which phase bodies consult to
/// decide whether to log extra detail.
pub trait PhaseContext {
    fn verbose_flag(&self) -> &Cell<bool>;

    fn in_verbose_phase(&self) -> bool {
        self.verbose_flag().get()
    }
}

/// Sets the verbose flag for as long as it is alive. The previous value is
/// restored on drop, including when the phase body returns early or panics.
#[must_use = "the verbose flag is reset as soon as the scope is dropped"]
pub struct VerboseScope<'c> {
    flag: &'c Cell<bool>,
    previous: bool,
}

impl<'c> VerboseScope<'c> {
    pub fn enter(flag: &'c Cell<bool>, verbose: bool) -> Self {
        let previous = flag.replace(verbose);
        Self { flag, previous }
    }
}

impl Drop for VerboseScope<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// Wraps the execution of a single phase.
pub trait PhaseRunner<C, D> {
    fn report_before(
        &self,
        registry: &PhaseRegistry,
        phase: &PhaseDescriptor,
        input: &D,
    ) -> Result<()>;

    /// Runs the body of `phase`. Implementations decide how (plain, timed).
    fn run_body(
        &self,
        registry: &PhaseRegistry,
        context: &C,
        phase: &Phase<C, D>,
        input: D,
    ) -> Result<D>;

    fn report_after(
        &self,
        registry: &PhaseRegistry,
        phase: &PhaseDescriptor,
        output: &D,
    ) -> Result<()>;
}

/// Destination of IR dumps.
pub trait DumpSink {
    fn emit(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DumpSink for StdoutSink {
    fn emit(&self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        Ok(())
    }
}

/// Appends dumps to a file with colors stripped.
#[derive(Debug)]
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(File::create(path)?),
        })
    }
}

impl DumpSink for FileSink {
    fn emit(&self, text: &str) -> Result<()> {
        let plain = strip_ansi_escapes::strip_str(text);
        self.file.lock().write_all(plain.as_bytes())?;
        Ok(())
    }
}

/// Keeps dumps in memory with colors stripped.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: RefCell<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.borrow().clone()
    }
}

impl DumpSink for MemorySink {
    fn emit(&self, text: &str) -> Result<()> {
        self.buffer
            .borrow_mut()
            .push_str(&strip_ansi_escapes::strip_str(text));
        Ok(())
    }
}

/// The runner used unless a driver brings its own: dumps according to the
/// registry's dump sets and optionally times phase bodies.
#[derive(Debug)]
pub struct DefaultPhaseRunner<S = StdoutSink> {
    time_phases: bool,
    excluded_from_dump: HashSet<String>,
    sink: S,
}

impl<S: DumpSink> DefaultPhaseRunner<S> {
    pub fn new(config: &Configuration, sink: S) -> Self {
        Self {
            time_phases: config.flag(ConfigKey::TimePhases),
            excluded_from_dump: config
                .names(ConfigKey::ExcludeFromDump)
                .iter()
                .cloned()
                .collect(),
            sink,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn dump<D: IrDump>(&self, element: &str, title: String, data: &D) -> Result<()> {
        if self.excluded_from_dump.contains(element) {
            return Ok(());
        }

        self.sink
            .emit(&format!("\n\n--- {title} ----------------------\n"))?;
        self.sink.emit(&data.dump())
    }
}

impl<C, D, S> PhaseRunner<C, D> for DefaultPhaseRunner<S>
where
    C: PhaseContext,
    D: IrDump,
    S: DumpSink,
{
    fn report_before(
        &self,
        registry: &PhaseRegistry,
        phase: &PhaseDescriptor,
        input: &D,
    ) -> Result<()> {
        if !registry.dumps_before(phase.id) {
            return Ok(());
        }

        let element = input.element_name();
        let title = match phase.kind {
            PhaseKind::StartMarker => {
                format!("IR for {element} at the start of lowering process")
            }
            PhaseKind::EndMarker => return Ok(()),
            PhaseKind::Regular => format!("IR for {element} before {}", phase.description),
        };

        self.dump(&element, title, input)
    }

    fn run_body(
        &self,
        registry: &PhaseRegistry,
        context: &C,
        phase: &Phase<C, D>,
        input: D,
    ) -> Result<D> {
        let _verbose = VerboseScope::enter(context.verbose_flag(), registry.is_verbose(phase.id()));

        if self.time_phases && !phase.descriptor().kind.is_marker() {
            let start = Instant::now();
            let output = phase.invoke(context, input)?;

            info!(
                "{}: {} msec",
                phase.description(),
                start.elapsed().as_millis()
            );

            Ok(output)
        } else {
            phase.invoke(context, input)
        }
    }

    fn report_after(
        &self,
        registry: &PhaseRegistry,
        phase: &PhaseDescriptor,
        output: &D,
    ) -> Result<()> {
        if !registry.dumps_after(phase.id) {
            return Ok(());
        }

        let element = output.element_name();
        let title = match phase.kind {
            PhaseKind::EndMarker => format!("IR for {element} at the end of lowering process"),
            PhaseKind::StartMarker => return Ok(()),
            PhaseKind::Regular => format!("IR for {element} after {}", phase.description),
        };

        self.dump(&element, title, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[derive(Default)]
    struct Context {
        verbose: Cell<bool>,
    }

    impl PhaseContext for Context {
        fn verbose_flag(&self) -> &Cell<bool> {
            &self.verbose
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Tree(&'static str, u32);

    impl IrDump for Tree {
        fn element_name(&self) -> String {
            self.0.to_owned()
        }

        fn dump(&self) -> String {
            format!("{} = {}\n", self.0, self.1)
        }
    }

    fn registry(config: &Configuration) -> PhaseRegistry {
        let mut builder = PhaseRegistry::builder();
        let start = builder.start_marker("start", "Start");
        let bump = builder.register("bump", "Bump the counter", &[start]);
        builder.end_marker("end", "End", &[bump]);
        builder.build(config).unwrap()
    }

    fn run(
        registry: &PhaseRegistry,
        runner: &DefaultPhaseRunner<MemorySink>,
        context: &Context,
        phase: &Phase<Context, Tree>,
        tree: Tree,
    ) -> Result<Tree> {
        let runner: &dyn PhaseRunner<Context, Tree> = runner;
        runner.report_before(registry, phase.descriptor(), &tree)?;
        let tree = runner.run_body(registry, context, phase, tree)?;
        runner.report_after(registry, phase.descriptor(), &tree)?;
        Ok(tree)
    }

    #[test]
    fn test_dumps_regular_phase_on_both_sides() {
        let config = Configuration::new().with_names(ConfigKey::Dump, ["bump"]);
        let registry = registry(&config);
        let runner = DefaultPhaseRunner::new(&config, MemorySink::new());
        let bump = registry
            .bind(registry.resolve("bump").unwrap(), |_: &Context, t: Tree| {
                Ok(Tree(t.0, t.1 + 1))
            })
            .unwrap();

        let tree = run(&registry, &runner, &Context::default(), &bump, Tree("main", 1)).unwrap();

        assert_eq!(tree, Tree("main", 2));
        assert_eq!(
            runner.sink().contents(),
            "\n\n--- IR for main before Bump the counter ----------------------\nmain = 1\n\
             \n\n--- IR for main after Bump the counter ----------------------\nmain = 2\n"
        );
    }

    #[test]
    fn test_markers_only_dump_their_own_side() {
        let config = Configuration::new().with_names(ConfigKey::Dump, ["ALL"]);
        let registry = registry(&config);
        let runner = DefaultPhaseRunner::new(&config, MemorySink::new());
        let context = Context::default();
        let identity = |_: &Context, t: Tree| -> Result<Tree> { Ok(t) };
        let start = registry.bind(registry.resolve("start").unwrap(), identity).unwrap();
        let end = registry.bind(registry.resolve("end").unwrap(), identity).unwrap();

        let tree = run(&registry, &runner, &context, &start, Tree("m", 0)).unwrap();
        run(&registry, &runner, &context, &end, tree).unwrap();

        let dumped = runner.sink().contents();
        assert!(dumped.contains("IR for m at the start of lowering process"));
        assert!(dumped.contains("IR for m at the end of lowering process"));
        assert_eq!(dumped.matches("--- IR for").count(), 2);
    }

    #[test]
    fn test_excluded_elements_are_never_dumped() {
        let config = Configuration::new()
            .with_names(ConfigKey::DumpBefore, ["bump"])
            .with_names(ConfigKey::DumpAfter, ["bump"])
            .with_names(ConfigKey::ExcludeFromDump, ["Foo"]);
        let registry = registry(&config);
        let runner = DefaultPhaseRunner::new(&config, MemorySink::new());
        let bump = registry
            .bind(registry.resolve("bump").unwrap(), |_: &Context, t: Tree| Ok(t))
            .unwrap();

        run(&registry, &runner, &Context::default(), &bump, Tree("Foo", 0)).unwrap();

        assert!(runner.sink().contents().is_empty());
    }

    #[test]
    fn test_verbose_flag_is_scoped_to_the_body() {
        let config = Configuration::new()
            .with_names(ConfigKey::VerbosePhases, ["bump"])
            .with_flag(ConfigKey::TimePhases, true);
        let registry = registry(&config);
        let runner = DefaultPhaseRunner::new(&config, MemorySink::new());
        let context = Context::default();
        let failing = registry
            .bind(registry.resolve("bump").unwrap(), |context: &Context, _: Tree| {
                assert!(context.in_verbose_phase());
                Err(PipelineError::Lowering("bump failed".to_owned()))
            })
            .unwrap();

        let result = runner.run_body(&registry, &context, &failing, Tree("main", 0));

        assert!(matches!(result, Err(PipelineError::Lowering(_))));
        assert!(!context.in_verbose_phase());
    }

    #[test]
    fn test_verbose_scope_restores_previous_value() {
        let flag = Cell::new(true);

        {
            let _scope = VerboseScope::enter(&flag, false);
            assert!(!flag.get());
        }

        assert!(flag.get());
    }
}

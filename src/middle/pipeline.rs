//! The LIR lowering pipeline.
//!
//! Module level phases run on a root [`PhaseManager`] and every function is
//! cleaned up by its own child manager, so function phases can require
//! `refine_types` which only ever runs on the module.

use std::{cell::Cell, collections::BTreeSet, sync::Arc};

use hashbrown::HashMap;
use itertools::Itertools;
use tracing::info;

use super::{
    lir::{
        self,
        pretty_print::{pretty_print_lir, pretty_print_module},
    },
    optimization::pre_ssa,
};
use crate::{
    cache::LocalCache,
    config::Configuration,
    error::Result,
    intern::InternedSymbol,
    phase::{IrDump, Phase, PhaseContext, PhaseManager, PhaseRegistry, PhaseRunner},
    refinement::{ModuleDescriptor, RealRefinementCache, RefinementTypes},
};

/// Refinement over LIR types. `expect` classes are identified by name and
/// their scope is the set of functions that mention them.
#[derive(Debug, Clone, Copy)]
pub struct LirTypes;

impl RefinementTypes for LirTypes {
    type TypeConstructor = lir::Type;
    type Type = lir::Type;
    type Class = InternedSymbol;
    type Scope = Arc<[InternedSymbol]>;
}

pub fn real_refinement_cache() -> RealRefinementCache<LirTypes> {
    RealRefinementCache::new(|ty| matches!(ty, lir::Type::Expect(_)))
}

/// State shared by every phase of one lowering run.
#[derive(Debug)]
pub struct LoweringContext {
    verbose: Cell<bool>,
    module: ModuleDescriptor<LirTypes>,
    /// Platform counterparts of `expect` types, by name
    actuals: HashMap<InternedSymbol, lir::Type>,
    initial_sizes: LocalCache<InternedSymbol, usize>,
}

impl LoweringContext {
    pub fn new(
        module: ModuleDescriptor<LirTypes>,
        actuals: HashMap<InternedSymbol, lir::Type>,
    ) -> Self {
        Self {
            verbose: Cell::new(false),
            module,
            actuals,
            initial_sizes: LocalCache::new(),
        }
    }

    pub fn module(&self) -> &ModuleDescriptor<LirTypes> {
        &self.module
    }

    /// The platform type `ty` stands for, or `ty` itself if there is none.
    pub fn refine(&self, ty: lir::Type) -> lir::Type {
        if !self.module.is_refinement_needed_for_type_constructor(&ty) {
            return ty;
        }

        self.module.refine_or_get_type(&ty, |_| match ty {
            lir::Type::Expect(name) => self.actuals.get(&name).copied(),
            _ => None,
        })
    }

    /// Instruction count of `function` the first time it was seen.
    pub fn initial_size(&self, function: &lir::FunctionDefinition) -> usize {
        self.initial_sizes
            .get_or_compute(function.symbol_name, |_| function.instruction_count())
    }
}

impl PhaseContext for LoweringContext {
    fn verbose_flag(&self) -> &Cell<bool> {
        &self.verbose
    }
}

impl IrDump for lir::Module {
    fn element_name(&self) -> String {
        self.name.value().to_owned()
    }

    fn dump(&self) -> String {
        pretty_print_module(self)
    }
}

impl IrDump for lir::FunctionDefinition {
    fn element_name(&self) -> String {
        self.symbol_name.value().to_owned()
    }

    fn dump(&self) -> String {
        pretty_print_lir(self)
    }
}

type ModulePhase = Phase<LoweringContext, lir::Module>;
type FunctionPhase = Phase<LoweringContext, lir::FunctionDefinition>;

/// Every phase of the lowering process, bound and ready to run.
#[derive(Debug)]
pub struct LoweringPipeline {
    registry: PhaseRegistry,
    begin_lowering: ModulePhase,
    refine_types: ModulePhase,
    function_phases: Vec<FunctionPhase>,
    end_lowering: ModulePhase,
}

impl LoweringPipeline {
    pub fn new(config: &Configuration) -> Result<Self> {
        let mut builder = PhaseRegistry::builder();
        let begin = builder.start_marker("begin_lowering", "Start of lowering");
        let refine = builder.register(
            "refine_types",
            "Refine expect types to their platform actuals",
            &[begin],
        );
        let truncate = builder.register(
            "truncate_after_returns",
            "Truncate instructions after returns",
            &[refine],
        );
        let propagate = builder.register(
            "propagate_constants",
            "Constant propagation",
            &[truncate],
        );
        let eliminate = builder.register(
            "eliminate_dead_blocks",
            "Dead block elimination",
            &[propagate],
        );
        let thread = builder.register("thread_jumps", "Jump threading", &[eliminate]);
        let merge = builder.register("merge_blocks", "Block merging", &[thread]);
        let end = builder.end_marker("end_lowering", "End of lowering", &[refine]);

        let registry = builder.build(config)?;

        let begin_lowering =
            registry.bind(begin, |_: &LoweringContext, module: lir::Module| Ok(module))?;
        let refine_types = registry.bind(refine, refine_module_types)?;
        let function_phases = vec![
            registry.bind(
                truncate,
                |_: &LoweringContext, mut function: lir::FunctionDefinition| {
                    pre_ssa::truncate_after_returns(&mut function);
                    Ok(function)
                },
            )?,
            registry.bind(
                propagate,
                |context: &LoweringContext, mut function: lir::FunctionDefinition| {
                    let propagated = pre_ssa::propagate_constants(&mut function);
                    if context.in_verbose_phase() {
                        info!(function = %function.symbol_name, propagated, "propagated constants");
                    }
                    Ok(function)
                },
            )?,
            registry.bind(
                eliminate,
                |context: &LoweringContext, mut function: lir::FunctionDefinition| {
                    let removed = pre_ssa::eliminate_dead_blocks(&mut function);
                    if context.in_verbose_phase() {
                        info!(function = %function.symbol_name, removed, "eliminated dead blocks");
                    }
                    Ok(function)
                },
            )?,
            registry.bind(
                thread,
                |_: &LoweringContext, mut function: lir::FunctionDefinition| {
                    pre_ssa::thread_jumps(&mut function);
                    Ok(function)
                },
            )?,
            registry.bind(
                merge,
                |context: &LoweringContext, mut function: lir::FunctionDefinition| {
                    let merged = pre_ssa::merge_blocks(&mut function);
                    if context.in_verbose_phase() {
                        info!(function = %function.symbol_name, merged, "merged blocks");
                    }
                    Ok(function)
                },
            )?,
        ];
        let end_lowering = registry.bind(end, report_sizes)?;

        Ok(Self {
            registry,
            begin_lowering,
            refine_types,
            function_phases,
            end_lowering,
        })
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    /// Runs every phase over `module`: module phases once, then the function
    /// phases over each function in a child scope, then the end marker.
    pub fn lower(
        &self,
        context: &LoweringContext,
        module_runner: &dyn PhaseRunner<LoweringContext, lir::Module>,
        function_runner: &dyn PhaseRunner<LoweringContext, lir::FunctionDefinition>,
        module: lir::Module,
    ) -> Result<lir::Module> {
        let mut manager = PhaseManager::new(context, &self.registry, module.clone(), module_runner);

        let module = manager.phase(&self.begin_lowering, module)?;
        let mut module = manager.phase(&self.refine_types, module)?;

        let mut functions = Vec::with_capacity(module.functions.len());
        for function in std::mem::take(&mut module.functions) {
            // before any function phase, enabled or not
            context.initial_size(&function);
            let mut child = manager.create_child(function.clone(), function_runner);

            let mut function = function;
            for phase in &self.function_phases {
                function = child.phase(phase, function)?;
            }

            functions.push(function);
        }
        module.functions = functions;

        manager.phase(&self.end_lowering, module)
    }
}

fn refine_module_types(context: &LoweringContext, mut module: lir::Module) -> Result<lir::Module> {
    if context.in_verbose_phase() {
        let unresolved = module
            .functions
            .iter()
            .flat_map(|function| function.registers.values())
            .filter_map(|register| match register.ty {
                lir::Type::Expect(class) if context.refine(register.ty) == register.ty => {
                    Some(class)
                }
                _ => None,
            })
            .collect::<BTreeSet<_>>();

        for class in unresolved {
            let users = expect_class_users(context, &module, class);
            info!(
                %class,
                users = %users.iter().join(", "),
                "no platform actual for expect type"
            );
        }
    }

    for function in &mut module.functions {
        for register in function.registers.values_mut() {
            register.ty = context.refine(register.ty);
        }
    }

    Ok(module)
}

/// Functions of `module` whose registers mention the expect type `class`.
/// Memoized per class when the module has a real refinement cache.
fn expect_class_users(
    context: &LoweringContext,
    module: &lir::Module,
    class: InternedSymbol,
) -> Arc<[InternedSymbol]> {
    context.module().get_or_put_scope_for_class(&class, || {
        module
            .functions
            .iter()
            .filter(|function| {
                function
                    .registers
                    .values()
                    .any(|register| register.ty == lir::Type::Expect(class))
            })
            .map(|function| function.symbol_name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    })
}

fn report_sizes(context: &LoweringContext, module: lir::Module) -> Result<lir::Module> {
    if context.in_verbose_phase() {
        for function in &module.functions {
            info!(
                function = %function.symbol_name,
                before = context.initial_size(function),
                after = function.instruction_count(),
                "lowered function"
            );
        }
    }

    Ok(module)
}

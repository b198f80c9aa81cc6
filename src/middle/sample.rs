//! A small common module used by the command line driver.

use hashbrown::HashMap;

use super::lir::{
    BinaryOperatorKind, FunctionBuilder, FunctionDefinition, Immediate, Instruction, IntegerWidth,
    Module, Operand, Type,
};
use crate::intern::InternedSymbol;

fn int(value: u64) -> Operand {
    Operand::Immediate(Immediate::Int(value, IntegerWidth::I32))
}

/// Platform counterparts of the `expect` types used by [`sample_module`].
/// `Float` has none.
pub fn platform_actuals() -> HashMap<InternedSymbol, Type> {
    HashMap::from([
        (InternedSymbol::new("Int"), Type::Integer(IntegerWidth::I32)),
        (InternedSymbol::new("Long"), Type::Integer(IntegerWidth::I64)),
        (InternedSymbol::new("Boolean"), Type::Bool),
    ])
}

pub fn sample_module() -> Module {
    Module {
        name: InternedSymbol::new("demo"),
        functions: vec![answer(), pick(), legacy()],
    }
}

/// Folds down to `ret 5`.
fn answer() -> FunctionDefinition {
    let mut builder = FunctionBuilder::new("answer");
    let two = builder.register(Type::Expect("Int".into()));
    let sum = builder.register(Type::Expect("Int".into()));
    let equal = builder.register(Type::Expect("Boolean".into()));
    let entry = builder.block();
    let then = builder.block();
    let otherwise = builder.block();

    builder
        .push(
            entry,
            Instruction::Move {
                destination: two,
                source: int(2),
            },
        )
        .push(
            entry,
            Instruction::BinaryOperation {
                operator: BinaryOperatorKind::Add,
                destination: sum,
                lhs: Operand::Register(two),
                rhs: int(3),
            },
        )
        .push(
            entry,
            Instruction::BinaryOperation {
                operator: BinaryOperatorKind::Equals,
                destination: equal,
                lhs: Operand::Register(sum),
                rhs: int(5),
            },
        )
        .push(
            entry,
            Instruction::Branch {
                condition: Operand::Register(equal),
                positive: then,
                negative: otherwise,
            },
        )
        .push(
            then,
            Instruction::Return {
                value: Some(Operand::Register(sum)),
            },
        )
        .push(
            otherwise,
            Instruction::Return {
                value: Some(int(0)),
            },
        );

    builder.finish()
}

/// The positive edge goes through a block that only jumps.
fn pick() -> FunctionDefinition {
    let mut builder = FunctionBuilder::new("pick");
    let condition = builder.argument(Type::Expect("Boolean".into()));
    let entry = builder.block();
    let trampoline = builder.block();
    let otherwise = builder.block();
    let target = builder.block();

    builder
        .push(
            entry,
            Instruction::Branch {
                condition: Operand::Register(condition),
                positive: trampoline,
                negative: otherwise,
            },
        )
        .push(trampoline, Instruction::Jump { destination: target })
        .push(
            otherwise,
            Instruction::Return {
                value: Some(int(0)),
            },
        )
        .push(
            target,
            Instruction::Return {
                value: Some(int(1)),
            },
        );

    builder.finish()
}

/// Uses an `expect` type that has no platform actual.
fn legacy() -> FunctionDefinition {
    let mut builder = FunctionBuilder::new("legacy");
    builder.register(Type::Expect("Float".into()));
    let entry = builder.block();

    builder
        .push(entry, Instruction::Return { value: None })
        .push(entry, Instruction::Comment("never reached".to_owned()));

    builder.finish()
}

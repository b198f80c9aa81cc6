use std::fmt::Write;

use colored::Colorize;
use itertools::Itertools;

use crate::{index::Index, middle::lir};

pub fn pretty_print_lir(function: &lir::FunctionDefinition) -> String {
    let mut out = String::new();

    // Writing to a `String` cannot fail
    let _ = write_function(&mut out, function);

    out
}

pub fn pretty_print_module(module: &lir::Module) -> String {
    let mut out = format!("{} {}\n", "module".magenta(), module.name.value().blue());

    for function in &module.functions {
        out.push('\n');
        out.push_str(&pretty_print_lir(function));
    }

    out
}

fn write_function(out: &mut String, function: &lir::FunctionDefinition) -> std::fmt::Result {
    write!(
        out,
        "{} {}{}",
        "fn".magenta(),
        function.symbol_name.value().blue(),
        "(".white()
    )?;

    write!(
        out,
        "{}",
        function
            .arguments
            .iter()
            .map(|arg| match function.registers.get(arg) {
                Some(register) => format!("{arg}: {}", register.ty),
                None => arg.to_string(),
            })
            .join(", ")
            .white()
    )?;

    writeln!(out, "{}", ") {".white())?;

    for register in function.registers.values() {
        if !function.arguments.contains(&register.id) {
            writeln!(out, "    {} {}: {}", "let".magenta(), register.id, register.ty)?;
        }
    }

    for block in function.blocks.values() {
        writeln!(out, "{}", format!("{}:", block.id).bright_red())?;

        for instruction in &block.instructions {
            writeln!(out, "    {instruction}")?;
        }
    }

    writeln!(out, "{}", "}".white())
}

impl core::fmt::Display for lir::Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Instruction::Move {
                destination,
                source,
            } => {
                write!(f, "{destination} {} {source}", "=".white())
            }
            lir::Instruction::UnaryOperation {
                operator,
                destination,
                operand,
            } => {
                write!(
                    f,
                    "{destination} {} {}{operand}",
                    "=".white(),
                    operator.to_string().white()
                )
            }
            lir::Instruction::BinaryOperation {
                operator,
                destination,
                lhs,
                rhs,
            } => {
                write!(
                    f,
                    "{destination} {} {lhs} {} {rhs}",
                    "=".white(),
                    operator.to_string().white()
                )
            }
            lir::Instruction::Branch {
                condition,
                positive,
                negative,
            } => {
                write!(
                    f,
                    "{} {condition} {} {}",
                    "br".cyan(),
                    positive.to_string().blue(),
                    negative.to_string().blue()
                )
            }
            lir::Instruction::Jump { destination } => {
                write!(f, "{} {}", "jmp".cyan(), destination.to_string().blue())
            }
            lir::Instruction::Return { value: Some(value) } => {
                write!(f, "{} {value}", "ret".cyan())
            }
            lir::Instruction::Return { value: None } => {
                write!(f, "{}", "ret".cyan())
            }
            lir::Instruction::Comment(text) => {
                write!(f, "{}", format!("; {text}").bright_black())
            }
        }
    }
}

impl core::fmt::Display for lir::RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("%{}", self.index()).yellow())
    }
}

impl core::fmt::Display for lir::BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ".label_{}", self.index())
    }
}

impl core::fmt::Display for lir::Immediate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Immediate::Int(value, width) => {
                write!(f, "{}", width.sign_extend(*value))
            }
            lir::Immediate::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl core::fmt::Display for lir::Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Operand::Immediate(immediate) => write!(f, "{}", immediate.to_string().purple()),
            lir::Operand::Register(register_id) => write!(f, "{register_id}"),
        }
    }
}

impl core::fmt::Display for lir::Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Type::Integer(width) => write!(f, "{width}"),
            lir::Type::Bool => write!(f, "bool"),
            lir::Type::Expect(name) => write!(f, "expect {}", name.value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::middle::lir::{
        BinaryOperatorKind, FunctionBuilder, Immediate, Instruction, IntegerWidth, Operand, Type,
    };

    #[test]
    fn test_pretty_prints_function() {
        let mut builder = FunctionBuilder::new("add_one");
        let x = builder.argument(Type::Integer(IntegerWidth::I32));
        let sum = builder.register(Type::Expect("Int".into()));
        let entry = builder.block();
        builder
            .push(
                entry,
                Instruction::BinaryOperation {
                    operator: BinaryOperatorKind::Add,
                    destination: sum,
                    lhs: Operand::Register(x),
                    rhs: Operand::Immediate(Immediate::Int(1, IntegerWidth::I32)),
                },
            )
            .push(
                entry,
                Instruction::Return {
                    value: Some(Operand::Register(sum)),
                },
            );

        let printed = strip_ansi_escapes::strip_str(pretty_print_lir(&builder.finish()));

        assert_eq!(
            printed,
            indoc! {"
                fn add_one(%0: i32) {
                    let %1: expect Int
                .label_0:
                    %1 = %0 + 1
                    ret %1
                }
            "}
        );
    }
}

//! LIR (Low-level Intermediate Representation). In this form, loops and
//! conditionals are simplified to labels and jumps and expression trees are
//! flattened into ordered instructions over virtual registers.
//!
//! Blocks are laid out in id order. A block without a terminator falls
//! through to the next block.

use std::collections::{BTreeMap, BTreeSet};

use strum::Display;

use crate::{
    index::{Index, simple_index},
    intern::InternedSymbol,
};

pub mod pretty_print;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: InternedSymbol,
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub symbol_name: InternedSymbol,
    /// Allocated virtual registers used to store temporary data
    pub registers: BTreeMap<RegisterId, Register>,
    pub arguments: Vec<RegisterId>,
    pub blocks: BTreeMap<BlockId, Block>,
}

impl FunctionDefinition {
    pub fn instruction_count(&self) -> usize {
        self.blocks
            .values()
            .map(|block| block.instructions.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub predecessors: BTreeSet<BlockId>,
}

impl Block {
    pub fn returns(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|i| matches!(i, Instruction::Return { .. }))
    }

    /// Blocks this block explicitly transfers control to.
    pub fn successors(&self) -> Vec<BlockId> {
        match self.instructions.last() {
            Some(Instruction::Jump { destination }) => vec![*destination],
            Some(Instruction::Branch {
                positive, negative, ..
            }) => vec![*positive, *negative],
            _ => Vec::new(),
        }
    }
}

simple_index! {
    /// Identifies an LIR block
    pub struct BlockId;
}

impl BlockId {
    pub const ZERO: Self = Self(0);
}

/// A temporary virtual register of some type
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Register {
    pub id: RegisterId,
    pub ty: Type,
}

simple_index! {
    /// Identifies a virtual LIR register which holds a temporary value
    pub struct RegisterId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IntegerWidth {
    I8,
    I16,
    I32,
    I64,
}

impl IntegerWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntegerWidth::I8 => 8,
            IntegerWidth::I16 => 16,
            IntegerWidth::I32 => 32,
            IntegerWidth::I64 => 64,
        }
    }

    /// Drops the bits that do not fit in this width.
    pub fn truncate(self, value: u64) -> u64 {
        match self.bits() {
            64 => value,
            bits => value & ((1 << bits) - 1),
        }
    }

    pub fn sign_extend(self, value: u64) -> i64 {
        let shift = 64 - self.bits();
        ((value << shift) as i64) >> shift
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Integer(IntegerWidth),
    Bool,
    /// A platform type declared by a common module whose actual counterpart
    /// is only known once the module is refined for a platform
    Expect(InternedSymbol),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOperatorKind {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "==")]
    Equals,
    #[strum(serialize = "!=")]
    NotEquals,
    #[strum(serialize = "<")]
    LessThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOperatorKind {
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "!")]
    LogicalNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Move {
        destination: RegisterId,
        source: Operand,
    },
    UnaryOperation {
        operator: UnaryOperatorKind,
        destination: RegisterId,
        operand: Operand,
    },
    BinaryOperation {
        operator: BinaryOperatorKind,
        destination: RegisterId,
        lhs: Operand,
        rhs: Operand,
    },
    Branch {
        condition: Operand,
        positive: BlockId,
        negative: BlockId,
    },
    Jump {
        destination: BlockId,
    },
    Return {
        value: Option<Operand>,
    },
    Comment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    Int(u64, IntegerWidth),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Immediate(Immediate),
    Register(RegisterId),
}

/// Builds a function block by block. Predecessor sets are derived from the
/// terminators when the function is finished.
#[derive(Debug)]
pub struct FunctionBuilder {
    function: FunctionDefinition,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            function: FunctionDefinition {
                symbol_name: InternedSymbol::new(name),
                registers: BTreeMap::new(),
                arguments: Vec::new(),
                blocks: BTreeMap::new(),
            },
        }
    }

    pub fn register(&mut self, ty: Type) -> RegisterId {
        let id = RegisterId::new(self.function.registers.len());
        self.function.registers.insert(id, Register { id, ty });
        id
    }

    pub fn argument(&mut self, ty: Type) -> RegisterId {
        let id = self.register(ty);
        self.function.arguments.push(id);
        id
    }

    pub fn block(&mut self) -> BlockId {
        let id = BlockId::new(self.function.blocks.len());
        self.function.blocks.insert(
            id,
            Block {
                id,
                instructions: Vec::new(),
                predecessors: BTreeSet::new(),
            },
        );
        id
    }

    pub fn push(&mut self, block: BlockId, instruction: Instruction) -> &mut Self {
        if let Some(block) = self.function.blocks.get_mut(&block) {
            block.instructions.push(instruction);
        }
        self
    }

    pub fn finish(mut self) -> FunctionDefinition {
        let blocks = self.function.blocks.values().collect::<Vec<_>>();
        let mut edges = Vec::new();

        for (i, block) in blocks.iter().enumerate() {
            let successors = match block.instructions.last() {
                Some(
                    Instruction::Jump { .. }
                    | Instruction::Branch { .. }
                    | Instruction::Return { .. },
                ) => block.successors(),
                // falls through
                _ => blocks.get(i + 1).map(|next| vec![next.id]).unwrap_or_default(),
            };

            edges.extend(successors.into_iter().map(|successor| (block.id, successor)));
        }

        for (predecessor, successor) in edges {
            if let Some(block) = self.function.blocks.get_mut(&successor) {
                block.predecessors.insert(predecessor);
            }
        }

        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_derives_predecessors() {
        let mut builder = FunctionBuilder::new("diamond");
        let condition = builder.argument(Type::Bool);
        let entry = builder.block();
        let left = builder.block();
        let right = builder.block();
        let exit = builder.block();

        builder
            .push(
                entry,
                Instruction::Branch {
                    condition: Operand::Register(condition),
                    positive: left,
                    negative: right,
                },
            )
            .push(left, Instruction::Jump { destination: exit })
            .push(right, Instruction::Jump { destination: exit })
            .push(exit, Instruction::Return { value: None });

        let function = builder.finish();

        assert_eq!(
            function.blocks[&exit].predecessors,
            BTreeSet::from([left, right])
        );
        assert!(function.blocks[&entry].predecessors.is_empty());
        assert!(function.blocks[&exit].returns());
        assert_eq!(function.instruction_count(), 4);
    }

    #[test]
    fn test_integer_widths_wrap() {
        assert_eq!(IntegerWidth::I8.truncate(0x1ff), 0xff);
        assert_eq!(IntegerWidth::I8.sign_extend(0xff), -1);
        assert_eq!(IntegerWidth::I64.truncate(u64::MAX), u64::MAX);
        assert_eq!(IntegerWidth::I32.to_string(), "i32");
    }
}

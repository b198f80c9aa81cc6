use hashbrown::{HashMap, HashSet};

use crate::middle::lir::{self, BinaryOperatorKind, UnaryOperatorKind};

/// Go through blocks which have a return statement, and delete anything
/// after that. Truncates to the index of the first return.
pub fn truncate_after_returns(function: &mut lir::FunctionDefinition) {
    for block in function.blocks.values_mut() {
        let Some(ret_index) = block
            .instructions
            .iter()
            .position(|i| matches!(i, lir::Instruction::Return { .. }))
        else {
            continue;
        };

        block.instructions.truncate(ret_index + 1);
    }
}

/// Jump threading. Eliminates blocks that are just a jump by pointing their
/// predecessors at the jump destination.
pub fn thread_jumps(function: &mut lir::FunctionDefinition) {
    for block_id in function.blocks.keys().copied().collect::<Vec<_>>() {
        /* Find the blocks we're looking for */

        // The entry block has to stay where it is
        if block_id == lir::BlockId::ZERO {
            continue;
        }

        let Some(block) = function.blocks.get(&block_id) else {
            continue;
        };

        let [
            lir::Instruction::Jump {
                destination: new_dest,
            },
        ] = block.instructions.as_slice()
        else {
            continue;
        };

        let new_dest = *new_dest;
        if new_dest == block_id || !function.blocks.contains_key(&new_dest) {
            continue;
        }

        /* Update the CFG */

        let predecessors = block.predecessors.clone();

        // A predecessor falling through into this block has nothing to patch
        if predecessors.iter().any(|predecessor| {
            function
                .blocks
                .get(predecessor)
                .is_none_or(|predecessor| !predecessor.successors().contains(&block_id))
        }) {
            continue;
        }

        // Patch any instructions in predecessor blocks that reference this
        // block as the jump target
        for predecessor in &predecessors {
            let Some(predecessor) = function.blocks.get_mut(predecessor) else {
                continue;
            };

            for instruction in &mut predecessor.instructions {
                match instruction {
                    lir::Instruction::Branch {
                        positive, negative, ..
                    } => {
                        if *positive == block_id {
                            *positive = new_dest;
                        }
                        if *negative == block_id {
                            *negative = new_dest;
                        }
                    }
                    lir::Instruction::Jump { destination } if *destination == block_id => {
                        *destination = new_dest;
                    }
                    _ => {}
                }
            }
        }

        // Add all the old block's predecessors to the new jump destination.
        // This is very important to make sure we preserve the CFG.
        if let Some(destination) = function.blocks.get_mut(&new_dest) {
            destination.predecessors.extend(predecessors);
        }

        function.blocks.remove(&block_id);
        for block in function.blocks.values_mut() {
            block.predecessors.remove(&block_id);
        }
    }
}

/// Analyzes the blocks to see which registers are both loaded with constants
/// and also never re-assigned. After doing so, all uses of these registers in
/// the rest of the LIR are replaced with the constant value and operations on
/// constants are evaluated. This is done repeatedly until there are no more
/// non-propagated constants.
///
/// Returns how many registers were replaced by constants.
pub fn propagate_constants(function: &mut lir::FunctionDefinition) -> usize {
    let mut propagated = 0;

    loop {
        let constant_map = find_constant_registers(function);

        // If there are no more constant loads that are not reassigned, we're done
        if constant_map.is_empty() {
            return propagated;
        }

        propagated += constant_map.len();

        // Remove the constant registers
        for block in function.blocks.values_mut() {
            block.instructions.retain(|instruction| {
                if let lir::Instruction::Move { destination, .. } = instruction {
                    !constant_map.contains_key(destination)
                } else {
                    true
                }
            });
        }

        // Replace any usages of constant registers with their immediate values
        let substitute = |operand: &mut lir::Operand| {
            if let lir::Operand::Register(register) = *operand {
                if let Some(immediate) = constant_map.get(&register) {
                    *operand = lir::Operand::Immediate(*immediate);
                }
            }
        };

        for block in function.blocks.values_mut() {
            for instruction in &mut block.instructions {
                match instruction {
                    lir::Instruction::Move { source, .. } => substitute(source),
                    lir::Instruction::UnaryOperation { operand, .. } => substitute(operand),
                    lir::Instruction::BinaryOperation { lhs, rhs, .. } => {
                        substitute(lhs);
                        substitute(rhs);
                    }
                    lir::Instruction::Branch { condition, .. } => substitute(condition),
                    lir::Instruction::Return { value: Some(value) } => substitute(value),
                    _ => {}
                }
            }
        }

        // Statically evaluate any arithmetic instructions which only contain
        // constant values
        for block in function.blocks.values_mut() {
            for instruction in &mut block.instructions {
                let folded = match instruction {
                    lir::Instruction::UnaryOperation {
                        operator,
                        destination,
                        operand: lir::Operand::Immediate(operand),
                    } => evaluate_unary(*operator, *operand).map(|value| (*destination, value)),
                    lir::Instruction::BinaryOperation {
                        operator,
                        destination,
                        lhs: lir::Operand::Immediate(lhs),
                        rhs: lir::Operand::Immediate(rhs),
                    } => evaluate_binary(*operator, *lhs, *rhs).map(|value| (*destination, value)),
                    _ => None,
                };

                if let Some((destination, value)) = folded {
                    *instruction = lir::Instruction::Move {
                        destination,
                        source: lir::Operand::Immediate(value),
                    };
                }
            }
        }
    }
}

/// Registers assigned exactly once, from an immediate. Arguments already hold
/// a value on entry so they are never constant.
fn find_constant_registers(
    function: &lir::FunctionDefinition,
) -> HashMap<lir::RegisterId, lir::Immediate> {
    let mut constant_map = HashMap::new();
    let mut assignment_counts: HashMap<lir::RegisterId, usize> = HashMap::new();

    for block in function.blocks.values() {
        for instruction in &block.instructions {
            match instruction {
                lir::Instruction::Move {
                    destination,
                    source,
                } => {
                    *assignment_counts.entry(*destination).or_default() += 1;

                    if let lir::Operand::Immediate(value) = source {
                        constant_map.insert(*destination, *value);
                    }
                }
                lir::Instruction::UnaryOperation { destination, .. }
                | lir::Instruction::BinaryOperation { destination, .. } => {
                    *assignment_counts.entry(*destination).or_default() += 1;
                }
                _ => {}
            }
        }
    }

    constant_map.retain(|register, _| {
        assignment_counts.get(register) == Some(&1) && !function.arguments.contains(register)
    });

    constant_map
}

fn evaluate_unary(operator: UnaryOperatorKind, operand: lir::Immediate) -> Option<lir::Immediate> {
    match (operator, operand) {
        (UnaryOperatorKind::Negate, lir::Immediate::Int(value, width)) => Some(
            lir::Immediate::Int(width.truncate(value.wrapping_neg()), width),
        ),
        (UnaryOperatorKind::LogicalNot, lir::Immediate::Bool(value)) => {
            Some(lir::Immediate::Bool(!value))
        }
        _ => None,
    }
}

fn evaluate_binary(
    operator: BinaryOperatorKind,
    lhs: lir::Immediate,
    rhs: lir::Immediate,
) -> Option<lir::Immediate> {
    match (lhs, rhs) {
        (lir::Immediate::Int(lhs, lhs_width), lir::Immediate::Int(rhs, rhs_width))
            if lhs_width == rhs_width =>
        {
            let width = lhs_width;

            // overflows are handled by truncating to the operand width
            let value = match operator {
                BinaryOperatorKind::Add => lir::Immediate::Int(width.truncate(lhs.wrapping_add(rhs)), width),
                BinaryOperatorKind::Subtract => {
                    lir::Immediate::Int(width.truncate(lhs.wrapping_sub(rhs)), width)
                }
                BinaryOperatorKind::Multiply => {
                    lir::Immediate::Int(width.truncate(lhs.wrapping_mul(rhs)), width)
                }
                BinaryOperatorKind::Equals => lir::Immediate::Bool(lhs == rhs),
                BinaryOperatorKind::NotEquals => lir::Immediate::Bool(lhs != rhs),
                BinaryOperatorKind::LessThan => {
                    lir::Immediate::Bool(width.sign_extend(lhs) < width.sign_extend(rhs))
                }
            };

            Some(value)
        }
        (lir::Immediate::Bool(lhs), lir::Immediate::Bool(rhs)) => match operator {
            BinaryOperatorKind::Equals => Some(lir::Immediate::Bool(lhs == rhs)),
            BinaryOperatorKind::NotEquals => Some(lir::Immediate::Bool(lhs != rhs)),
            _ => None,
        },
        _ => None,
    }
}

/// After constant propagation, there may be conditional branches which are
/// known statically at compile time to only go one way. This pass replaces
/// those branches with unconditional jumps and removes any blocks which no
/// longer have any predecessors as a result.
///
/// Returns how many blocks were removed.
pub fn eliminate_dead_blocks(function: &mut lir::FunctionDefinition) -> usize {
    let mut removed = 0;

    let block_ids = function.blocks.keys().copied().collect::<Vec<_>>();
    for block_id in &block_ids {
        let Some(block) = function.blocks.get_mut(block_id) else {
            continue;
        };

        if *block_id != lir::BlockId::ZERO && block.predecessors.is_empty() {
            let successors = block.successors();

            function.blocks.remove(block_id);
            removed += 1;

            for successor in successors {
                if let Some(successor) = function.blocks.get_mut(&successor) {
                    successor.predecessors.remove(block_id);
                }
            }
            continue;
        }

        let mut removed_branch = None;

        // Try and replace a branch with a jump
        for instruction in &mut block.instructions {
            let lir::Instruction::Branch {
                condition: lir::Operand::Immediate(lir::Immediate::Bool(condition)),
                positive,
                negative,
            } = *instruction
            else {
                continue;
            };

            let (taken, not_taken) = if condition {
                (positive, negative)
            } else {
                (negative, positive)
            };

            if taken != not_taken {
                removed_branch = Some(not_taken);
            }

            *instruction = lir::Instruction::Jump { destination: taken };
        }

        let Some(removed_branch) = removed_branch else {
            continue;
        };

        // ensure CFG correctness
        if let Some(not_taken) = function.blocks.get_mut(&removed_branch) {
            not_taken.predecessors.remove(block_id);
        }
    }

    removed
}

/// Analyzes jumps to see if there are any blocks that "fall through" meaning
/// they just jump directly to the next block. In this case the jump is removed
/// and if the successor block has no other predecessors, the blocks are merged
/// into a single block to simplify the CFG.
///
/// Returns how many blocks were merged away.
pub fn merge_blocks(function: &mut lir::FunctionDefinition) -> usize {
    let mut evicted = HashSet::new();

    let block_ids = function.blocks.keys().copied().collect::<Vec<_>>();
    for (i, block_id) in block_ids.iter().copied().enumerate() {
        let Some(next_block) = block_ids.get(i + 1).copied() else {
            break;
        };

        if evicted.contains(&block_id) {
            continue;
        }

        let Some(lir::Instruction::Jump { destination }) = function
            .blocks
            .get(&block_id)
            .and_then(|block| block.instructions.last())
        else {
            continue;
        };

        if *destination != next_block {
            continue;
        }

        if let Some(block) = function.blocks.get_mut(&block_id) {
            block.instructions.pop();
        }

        // If the only predecessor is this block, we can safely merge
        if function
            .blocks
            .get(&next_block)
            .is_none_or(|next| next.predecessors.len() != 1)
        {
            continue;
        }

        let Some(mut merged) = function.blocks.remove(&next_block) else {
            continue;
        };
        evicted.insert(next_block);

        // Successors of the merged block are now reached from this block
        for successor in merged.successors() {
            if let Some(successor) = function.blocks.get_mut(&successor) {
                successor.predecessors.remove(&next_block);
                successor.predecessors.insert(block_id);
            }
        }

        if let Some(block) = function.blocks.get_mut(&block_id) {
            block.instructions.append(&mut merged.instructions);
        }
    }

    evicted.len()
}

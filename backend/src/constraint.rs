use tcgen_core::{Error, OpFlags, Opcode, RegSet, Result, MAX_OP_ARGS, NB_OPS, OPCODE_DEFS};

use crate::host::{HostEmitter, TargetDesc};

/// Parsed constraint for one op argument.
#[derive(Debug, Clone, Copy)]
pub struct ArgConstraint {
    /// Admissible host registers.
    pub regs: RegSet,
    /// An immediate operand is acceptable (input only).
    pub accepts_const: bool,
    /// Output that must share a register with an input.
    pub oalias: bool,
    /// Input aliased to an output.
    pub ialias: bool,
    /// Peer argument index: the input for `oalias`, the output for
    /// `ialias`.
    pub alias_index: u8,
    /// Output must not reuse any input register.
    pub newreg: bool,
}

impl ArgConstraint {
    pub const NONE: Self = Self {
        regs: RegSet::EMPTY,
        accepts_const: false,
        oalias: false,
        ialias: false,
        alias_index: 0,
        newreg: false,
    };
}

/// Parsed constraints for one opcode, plus the order in which the
/// allocator should satisfy the arguments (most constrained first).
#[derive(Debug, Clone, Copy)]
pub struct OpConstraint {
    pub args: [ArgConstraint; MAX_OP_ARGS],
    /// Permutation of `0..nb_oargs+nb_iargs`: outputs sorted by
    /// decreasing tightness, then inputs likewise.
    pub sorted_args: [u8; MAX_OP_ARGS],
}

impl OpConstraint {
    const EMPTY: Self = Self {
        args: [ArgConstraint::NONE; MAX_OP_ARGS],
        sorted_args: [0; MAX_OP_ARGS],
    };
}

/// Per-context table of parsed constraints, indexed by opcode.
///
/// Built once from the target's constraint strings. Keeping the parsed
/// data out of the static op-def table means contexts never write shared
/// state.
pub struct ConstraintTable {
    defs: Vec<OpConstraint>,
}

impl ConstraintTable {
    pub fn build(host: &impl HostEmitter) -> Result<Self> {
        let target = host.target();
        let mut defs = vec![OpConstraint::EMPTY; NB_OPS];

        for (idx, def) in OPCODE_DEFS.iter().enumerate() {
            if def.flags.contains(OpFlags::NOT_PRESENT) {
                continue;
            }
            let nb_args = (def.nb_oargs + def.nb_iargs) as usize;
            if nb_args == 0 {
                continue;
            }
            let opc = Opcode::from_index(idx).unwrap();
            let strings = host
                .op_constraints(opc)
                .ok_or(Error::MissingConstraint(def.name))?;
            if strings.len() != nb_args {
                return Err(Error::MissingConstraint(def.name));
            }

            let ct = &mut defs[idx];
            let parse_type = target.layout.word_type();
            for (i, s) in strings.iter().enumerate() {
                for ch in s.chars() {
                    match ch {
                        '0'..='9' => {
                            let oarg = ch as usize - '0' as usize;
                            debug_assert!(oarg < def.nb_oargs as usize);
                            // The input inherits the output's register
                            // set; the pair is linked in both directions.
                            ct.args[i] = ct.args[oarg];
                            ct.args[oarg].oalias = true;
                            ct.args[oarg].alias_index = i as u8;
                            ct.args[i].ialias = true;
                            ct.args[i].alias_index = oarg as u8;
                        }
                        '&' => ct.args[i].newreg = true,
                        'i' => ct.args[i].accepts_const = true,
                        _ => {
                            let regs = host
                                .parse_constraint_char(ch, parse_type)
                                .ok_or(Error::BadConstraint { op: def.name, ch })?;
                            ct.args[i].regs = ct.args[i].regs.union(regs);
                        }
                    }
                }
            }

            sort_constraints(ct, target, 0, def.nb_oargs as usize);
            sort_constraints(ct, target, def.nb_oargs as usize, def.nb_iargs as usize);
        }

        Ok(Self { defs })
    }

    pub fn get(&self, opc: Opcode) -> &OpConstraint {
        &self.defs[opc as usize]
    }
}

/// Scarcer register sets get allocated first. An alias counts as a single
/// register; an argument with no register set at all goes last.
fn constraint_priority(ct: &OpConstraint, target: &TargetDesc, k: usize) -> u32 {
    let arg = &ct.args[k];
    let n = if arg.oalias {
        1
    } else if arg.regs.is_empty() {
        return 0;
    } else {
        arg.regs.count()
    };
    target.nb_regs as u32 - n + 1
}

fn sort_constraints(ct: &mut OpConstraint, target: &TargetDesc, start: usize, n: usize) {
    let mut order: Vec<u8> = (start..start + n).map(|i| i as u8).collect();
    // Stable: equal priorities keep their original argument order.
    order.sort_by_key(|&i| std::cmp::Reverse(constraint_priority(ct, target, i as usize)));
    ct.sorted_args[start..start + n].copy_from_slice(&order);
}

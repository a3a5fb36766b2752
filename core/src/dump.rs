use std::fmt::Write;

use crate::context::Context;
use crate::opcode::Opcode;
use crate::temp::TempIdx;
use crate::types::Cond;

impl Context {
    /// Printable name of a temp: globals by their declared name, other
    /// temps as `tmp<n>` / `loc<n>`.
    pub fn arg_name(&self, idx: TempIdx) -> String {
        let t = self.temp(idx);
        if let Some(name) = &t.name {
            name.clone()
        } else if t.is_local() {
            format!("loc{}", idx.0 - self.nb_globals())
        } else {
            format!("tmp{}", idx.0 - self.nb_globals())
        }
    }

    /// Render the op list to text, one op per line. Fed to the trace log
    /// by the translate pipeline.
    pub fn dump_ops(&self) -> String {
        let mut out = String::new();
        let mut oi = self.ops.first();
        while oi != 0 {
            let op = self.ops.get(oi);
            let def = op.opc.def();

            match op.opc {
                Opcode::InsnStart => {
                    let pc = op.args[0].raw() | (op.args[1].raw() << 32);
                    let _ = writeln!(out, " ---- {pc:#x}");
                }
                Opcode::Call => {
                    let nb_oargs = op.callo as usize;
                    let nb_iargs = op.calli as usize;
                    let func = op.args[nb_oargs + nb_iargs].raw();
                    let flags = op.args[nb_oargs + nb_iargs + 1].raw();
                    let _ = write!(out, " call {func:#x},${flags},${nb_oargs}");
                    for i in 0..nb_oargs {
                        let _ = write!(out, ",{}", self.arg_name(op.args[i].as_temp()));
                    }
                    for i in 0..nb_iargs {
                        let arg = op.args[nb_oargs + i];
                        if arg.is_dummy() {
                            let _ = write!(out, ",<dummy>");
                        } else {
                            let _ = write!(out, ",{}", self.arg_name(arg.as_temp()));
                        }
                    }
                    out.push('\n');
                }
                _ => {
                    let _ = write!(out, " {} ", def.name);
                    let nb_oargs = def.nb_oargs as usize;
                    let nb_iargs = def.nb_iargs as usize;
                    let nb_cargs = def.nb_cargs as usize;
                    let mut k = 0;
                    for _ in 0..nb_oargs + nb_iargs {
                        if k != 0 {
                            out.push(',');
                        }
                        let _ = write!(out, "{}", self.arg_name(op.args[k].as_temp()));
                        k += 1;
                    }
                    let mut c = 0;
                    if matches!(
                        op.opc,
                        Opcode::SetCond | Opcode::BrCond | Opcode::SetCond2 | Opcode::BrCond2
                    ) {
                        let raw = op.args[k].raw();
                        if k != 0 {
                            out.push(',');
                        }
                        match Cond::from_raw(raw) {
                            Some(cond) => out.push_str(cond.name()),
                            None => {
                                let _ = write!(out, "${raw:#x}");
                            }
                        }
                        k += 1;
                        c += 1;
                    }
                    for _ in c..nb_cargs {
                        if k != 0 {
                            out.push(',');
                        }
                        let _ = write!(out, "${:#x}", op.args[k].raw());
                        k += 1;
                    }
                    out.push('\n');
                }
            }
            oi = op.next;
        }
        out
    }
}

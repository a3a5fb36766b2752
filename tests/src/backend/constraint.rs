use tcgen_backend::ConstraintTable;
use tcgen_core::{Error, Opcode, RegSet};

use crate::host::{RecordingHost, ShlOverride};

#[test]
fn alias_links_both_directions() {
    let host = RecordingHost::new_64();
    let table = ConstraintTable::build(&host).unwrap();

    // add: ["r", "0", "ri"]
    let add = table.get(Opcode::Add);
    assert!(add.args[0].oalias);
    assert_eq!(add.args[0].alias_index, 1);
    assert!(add.args[1].ialias);
    assert_eq!(add.args[1].alias_index, 0);
    assert_eq!(add.args[1].regs, add.args[0].regs, "input copies output's set");
    assert!(!add.args[1].accepts_const);
    assert!(add.args[2].accepts_const);
    assert_eq!(add.args[2].regs, RegSet::first_n(16));
}

#[test]
fn multi_output_alias() {
    let host = RecordingHost::new_64();
    let table = ConstraintTable::build(&host).unwrap();

    // add2: ["r", "r", "0", "1", "ri", "ri"]
    let add2 = table.get(Opcode::Add2);
    assert!(add2.args[0].oalias && add2.args[0].alias_index == 2);
    assert!(add2.args[1].oalias && add2.args[1].alias_index == 3);
    assert!(add2.args[2].ialias && add2.args[2].alias_index == 0);
    assert!(add2.args[3].ialias && add2.args[3].alias_index == 1);
    assert!(add2.args[4].accepts_const && add2.args[5].accepts_const);
}

#[test]
fn newreg_flag() {
    let host = RecordingHost::new_64();
    let table = ConstraintTable::build(&host).unwrap();

    // setcond: ["&r", "r", "ri"]
    let sc = table.get(Opcode::SetCond);
    assert!(sc.args[0].newreg);
    assert!(!sc.args[1].newreg);
}

#[test]
fn sorted_args_stable_for_equal_priorities() {
    let host = RecordingHost::new_64();
    let table = ConstraintTable::build(&host).unwrap();

    // setcond2: ["&r", "r", "r", "ri", "ri"], all inputs equally wide.
    let sc2 = table.get(Opcode::SetCond2);
    assert_eq!(&sc2.sorted_args[..1], &[0]);
    assert_eq!(&sc2.sorted_args[1..5], &[1, 2, 3, 4]);
}

#[test]
fn scarcer_sets_sort_first() {
    let mut host = RecordingHost::new_64();
    // Third argument admits a single register; it must be satisfied
    // before the wide-open alias pair.
    host.shl_override = ShlOverride::Strings(&["r", "0", "v"]);
    let table = ConstraintTable::build(&host).unwrap();

    let shl = table.get(Opcode::Shl);
    assert_eq!(&shl.sorted_args[1..3], &[2, 1]);
}

#[test]
fn missing_entry_is_an_error() {
    let mut host = RecordingHost::new_64();
    host.shl_override = ShlOverride::Missing;
    assert_eq!(
        ConstraintTable::build(&host).err(),
        Some(Error::MissingConstraint("shl"))
    );
}

#[test]
fn unknown_character_is_an_error() {
    let mut host = RecordingHost::new_64();
    host.shl_override = ShlOverride::Strings(&["r", "0", "z"]);
    assert_eq!(
        ConstraintTable::build(&host).err(),
        Some(Error::BadConstraint { op: "shl", ch: 'z' })
    );
}

#[test]
fn short_entry_is_an_error() {
    let mut host = RecordingHost::new_64();
    host.shl_override = ShlOverride::Strings(&["r", "0"]);
    assert_eq!(
        ConstraintTable::build(&host).err(),
        Some(Error::MissingConstraint("shl"))
    );
}

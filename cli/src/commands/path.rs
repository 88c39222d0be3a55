//! `bastionctl path {show|validate}` -- the upgrade-path table.

use crate::error::{PathTableInvalid, Result};
use upgrade_daemon::{upgrade_path::UpgradePathTable, workdir::WorkDir};

pub fn show(workdir: &WorkDir) -> Result<()> {
    let table = UpgradePathTable::load(&workdir.upgrade_paths_file())?;
    if table.is_empty() {
        console_logger::warn("Upgrade-path table is empty:", "no device can be planned");
        return Ok(());
    }

    let mut entries: Vec<_> = table.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (source, hops) in entries {
        println!("{source} -> {}", hops.join(" -> "));
    }
    Ok(())
}

pub fn validate(workdir: &WorkDir) -> Result<()> {
    let table = UpgradePathTable::load(&workdir.upgrade_paths_file())?;
    let problems = table.validate();
    if problems.is_empty() {
        console_logger::info_with_data(
            "Upgrade-path table is valid, sources:",
            &table.len().to_string(),
        );
        return Ok(());
    }
    for problem in &problems {
        console_logger::error("Problem:", problem);
    }
    PathTableInvalid {
        count: problems.len(),
    }
    .fail()
}

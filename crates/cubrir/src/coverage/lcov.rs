//! LCOV tracefile records.
//!
//! One record per source file, in the sequence
//! `SF` / `FN` / `FNDA` / `FNF` / `FNH` / `BRDA` / `BRF` / `BRH` /
//! `DA` / `LH` / `LF` / `end_of_record`.

use std::io::{self, Write};
use std::path::Path;

use super::FileStatistics;

/// Write the complete record for one source file.
///
/// `destination` is the path the source file was copied to inside the
/// output directory; LCOV consumers resolve `SF:` against it.
pub(crate) fn write_file_record<W: Write>(
    out: &mut W,
    destination: &Path,
    stats: &FileStatistics,
) -> io::Result<()> {
    writeln!(out, "SF:{}", destination.display())?;

    for key in stats.functions.keys() {
        writeln!(out, "FN:{key}")?;
    }

    let mut functions_found: u32 = 0;
    let mut functions_hit: u32 = 0;
    for (key, hits) in &stats.functions {
        writeln!(out, "FNDA:{hits},{key}")?;
        functions_found += 1;
        if *hits > 0 {
            functions_hit += 1;
        }
    }
    writeln!(out, "FNF:{functions_found}")?;
    writeln!(out, "FNH:{functions_hit}")?;

    let mut alternatives_found: u32 = 0;
    let mut alternatives_hit: u32 = 0;
    for branch in stats.branches() {
        for (index, hits) in branch.hits().iter().enumerate() {
            // A branch point that never executed reports `-` for every
            // alternative rather than a zero count
            if branch.was_hit() {
                writeln!(out, "BRDA:{},0,{},{}", branch.branch_point(), index, hits)?;
            } else {
                writeln!(out, "BRDA:{},0,{},-", branch.branch_point(), index)?;
            }
            alternatives_found += 1;
            if *hits > 0 {
                alternatives_hit += 1;
            }
        }
    }
    writeln!(out, "BRF:{alternatives_found}")?;
    writeln!(out, "BRH:{alternatives_hit}")?;

    let mut lines_hit: u32 = 0;
    let mut lines_found: u32 = 0;
    for (line, hits) in stats.lines.iter().enumerate() {
        if *hits == -1 {
            continue;
        }
        writeln!(out, "DA:{line},{hits}")?;
        if *hits > 0 {
            lines_hit += 1;
        }
        lines_found += 1;
    }
    writeln!(out, "LH:{lines_hit}")?;
    writeln!(out, "LF:{lines_found}")?;

    writeln!(out, "end_of_record")?;
    Ok(())
}

//! Newline-delimited JSON dump of every stored entity.
//!
//! UIDs are only unique within a family, so every UID and every link target is
//! prefixed with its type: `Application:t1/a1`, `RestartEvent:restart/...`.
use crate::{
    entities::{Family, Record},
    storage::{Backend, Selection},
    Result,
};
use std::io::Write;
use tracing::*;

fn prefixed(family: Family, mut record: Record) -> Record {
    let kind = if family == Family::Event {
        record.kind.clone()
    } else {
        family.label().to_string()
    };
    record.uid = format!("{kind}:{}", record.uid);
    for (name, uid) in record.links.iter_mut() {
        if let Some(link) = family.link(name) {
            *uid = format!("{}:{uid}", link.target.label());
        }
    }
    record
}

/// Writes every family in export order, returns the number of lines written
pub async fn export<W: Write>(backend: &dyn Backend, out: &mut W) -> Result<usize> {
    let mut written = 0;
    for family in Family::ALL {
        let records = backend.list(family, Selection::All).await?;
        debug!("Exporting {} {}", records.len(), family.collection());
        for record in records {
            serde_json::to_writer(&mut *out, &prefixed(family, record))?;
            out.write_all(b"\n")?;
            written += 1;
        }
    }
    out.flush()?;
    Ok(written)
}

//! Persistent image of the nailed catalog-index descriptors.
//!
//! Rebuilding the catalog index descriptors through sequential scans on
//! every start is expensive, so the first worker to start serializes them
//! into `pg_internal.init` in the database directory and later workers
//! read the image back. The file is regenerated whenever it is missing or
//! unreadable at any frame, so it is not a compatibility surface between
//! versions.
//!
//! Per descriptor the layout is a sequence of little-endian `u32` length
//! frames: descriptor core, access-method row, relation row, one frame per
//! column row, the strategy vector, the support vector.

use crate::catalog::relcache::{layout_from_columns, RelDesc};
use crate::catalog::{
    AccessMethodForm, CatalogAccessPolicy, ColumnForm, RelKind, RelationForm,
};
use crate::common::error::{PlatterError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

pub const INIT_FILENAME: &str = "pg_internal.init";

const MAGIC: u32 = 0x504c_5452;

pub fn write(database_dir: &Path, descs: &[RelDesc]) -> Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    buf.write_u32::<LittleEndian>(MAGIC)?;
    buf.write_u32::<LittleEndian>(descs.len() as u32)?;
    for desc in descs {
        write_desc(&mut buf, desc)?;
    }
    fs::write(database_dir.join(INIT_FILENAME), &buf).map_err(|e| {
        PlatterError::Fatal(format!("cannot create init file {}: {}", INIT_FILENAME, e))
    })
}

pub fn read(database_dir: &Path) -> Result<Vec<RelDesc>> {
    let raw = fs::read(database_dir.join(INIT_FILENAME))?;
    let mut cur = Cursor::new(raw);
    if cur.read_u32::<LittleEndian>()? != MAGIC {
        return Err(PlatterError::Internal(
            "init file has a bad magic number".to_string(),
        ));
    }
    let count = cur.read_u32::<LittleEndian>()? as usize;
    let mut descs = Vec::with_capacity(count);
    for _ in 0..count {
        descs.push(read_desc(&mut cur)?);
    }
    Ok(descs)
}

fn write_desc(buf: &mut Vec<u8>, desc: &RelDesc) -> Result<()> {
    // descriptor core
    let mut core: Vec<u8> = Vec::new();
    core.write_u32::<LittleEndian>(desc.rel_id())?;
    core.write_u8(desc.kind().as_u8())?;
    core.write_u8(desc.nailed as u8)?;
    write_frame(buf, &core)?;

    // access method row (empty frame for plain heaps)
    let mut am: Vec<u8> = Vec::new();
    if let Some(form) = &desc.am {
        am.write_u32::<LittleEndian>(form.id)?;
        write_string(&mut am, &form.name)?;
        am.write_u16::<LittleEndian>(form.strategy_count)?;
        am.write_u16::<LittleEndian>(form.support_count)?;
    }
    write_frame(buf, &am)?;

    // relation row
    let mut rel: Vec<u8> = Vec::new();
    let form = &desc.form;
    rel.write_u32::<LittleEndian>(form.id)?;
    write_string(&mut rel, &form.name)?;
    rel.write_u8(form.kind.as_u8())?;
    rel.write_u32::<LittleEndian>(form.owner)?;
    rel.write_u8(form.is_shared as u8)?;
    rel.write_u16::<LittleEndian>(form.column_count)?;
    rel.write_u32::<LittleEndian>(form.storage_manager)?;
    rel.write_u8(form.has_rules as u8)?;
    rel.write_u8(form.has_indexes as u8)?;
    rel.write_u32::<LittleEndian>(form.am_id)?;
    write_frame(buf, &rel)?;

    // one frame per column row
    for i in 0..form.column_count as usize {
        let mut col: Vec<u8> = Vec::new();
        let layout = &desc.layout;
        let column = ColumnForm {
            rel_id: form.id,
            name: layout.column_names()[i].clone(),
            column_number: (i + 1) as u16,
            type_id: crate::catalog::type_id_of(layout.column_type(i).scalar_type),
            len: -1,
            align: b'i',
            by_value: false,
            is_dropped: false,
            type_mod: -1,
        };
        write_column(&mut col, &column)?;
        write_frame(buf, &col)?;
    }

    // strategy and support vectors
    let mut strat: Vec<u8> = Vec::new();
    for proc in &desc.strategy {
        strat.write_u32::<LittleEndian>(*proc)?;
    }
    write_frame(buf, &strat)?;

    let mut support: Vec<u8> = Vec::new();
    for proc in &desc.support {
        support.write_u32::<LittleEndian>(*proc)?;
    }
    write_frame(buf, &support)?;
    Ok(())
}

fn read_desc(cur: &mut Cursor<Vec<u8>>) -> Result<RelDesc> {
    let core = read_frame(cur)?;
    let mut core = Cursor::new(core);
    let rel_id = core.read_u32::<LittleEndian>()?;
    let kind = RelKind::from_u8(core.read_u8()?)
        .ok_or_else(|| PlatterError::Internal("bad relation kind in init file".to_string()))?;
    let nailed = core.read_u8()? != 0;

    let am_raw = read_frame(cur)?;
    let am = if am_raw.is_empty() {
        None
    } else {
        let mut am_cur = Cursor::new(am_raw);
        Some(AccessMethodForm {
            id: am_cur.read_u32::<LittleEndian>()?,
            name: read_string(&mut am_cur)?,
            strategy_count: am_cur.read_u16::<LittleEndian>()?,
            support_count: am_cur.read_u16::<LittleEndian>()?,
        })
    };

    let rel_raw = read_frame(cur)?;
    let mut rel = Cursor::new(rel_raw);
    let form = RelationForm {
        id: rel.read_u32::<LittleEndian>()?,
        name: read_string(&mut rel)?,
        kind: RelKind::from_u8(rel.read_u8()?).ok_or_else(|| {
            PlatterError::Internal("bad relation kind in init file".to_string())
        })?,
        owner: rel.read_u32::<LittleEndian>()?,
        is_shared: rel.read_u8()? != 0,
        column_count: rel.read_u16::<LittleEndian>()?,
        storage_manager: rel.read_u32::<LittleEndian>()?,
        has_rules: rel.read_u8()? != 0,
        has_indexes: rel.read_u8()? != 0,
        am_id: rel.read_u32::<LittleEndian>()?,
    };
    if form.id != rel_id || form.kind != kind {
        return Err(PlatterError::Internal(
            "init file descriptor and relation frames disagree".to_string(),
        ));
    }

    let mut columns = Vec::with_capacity(form.column_count as usize);
    for _ in 0..form.column_count {
        let raw = read_frame(cur)?;
        let mut col = Cursor::new(raw);
        columns.push(read_column(&mut col)?);
    }
    let layout = layout_from_columns(&columns, CatalogAccessPolicy::Bootstrap)?;

    let strategy = read_u32_vector(&read_frame(cur)?)?;
    let support = read_u32_vector(&read_frame(cur)?)?;

    Ok(RelDesc {
        nailed,
        local_to_xact: false,
        is_temp: false,
        layout,
        am,
        rules: Vec::new(),
        strategy,
        support,
        // the file descriptor is not yet opened, and lock
        // info is reinstalled on first use
        file_open: false,
        lock_tag: form.id,
        form,
    })
}

fn write_column(buf: &mut Vec<u8>, column: &ColumnForm) -> Result<()> {
    buf.write_u32::<LittleEndian>(column.rel_id)?;
    write_string(buf, &column.name)?;
    buf.write_u16::<LittleEndian>(column.column_number)?;
    buf.write_u32::<LittleEndian>(column.type_id)?;
    buf.write_i32::<LittleEndian>(column.len)?;
    buf.write_u8(column.align)?;
    buf.write_u8(column.by_value as u8)?;
    buf.write_u8(column.is_dropped as u8)?;
    buf.write_i32::<LittleEndian>(column.type_mod)?;
    Ok(())
}

fn read_column(cur: &mut Cursor<Vec<u8>>) -> Result<ColumnForm> {
    Ok(ColumnForm {
        rel_id: cur.read_u32::<LittleEndian>()?,
        name: read_string(cur)?,
        column_number: cur.read_u16::<LittleEndian>()?,
        type_id: cur.read_u32::<LittleEndian>()?,
        len: cur.read_i32::<LittleEndian>()?,
        align: cur.read_u8()?,
        by_value: cur.read_u8()? != 0,
        is_dropped: cur.read_u8()? != 0,
        type_mod: cur.read_i32::<LittleEndian>()?,
    })
}

fn write_frame(buf: &mut Vec<u8>, frame: &[u8]) -> Result<()> {
    buf.write_u32::<LittleEndian>(frame.len() as u32)?;
    buf.write_all(frame)?;
    Ok(())
}

fn read_frame(cur: &mut Cursor<Vec<u8>>) -> Result<Vec<u8>> {
    let len = cur.read_u32::<LittleEndian>()? as usize;
    let mut frame = vec![0u8; len];
    cur.read_exact(&mut frame)?;
    Ok(frame)
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    buf.write_u16::<LittleEndian>(s.len() as u16)?;
    buf.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string(cur: &mut impl Read) -> Result<String> {
    let len = cur.read_u16::<LittleEndian>()? as usize;
    let mut raw = vec![0u8; len];
    cur.read_exact(&mut raw)?;
    String::from_utf8(raw)
        .map_err(|_| PlatterError::Internal("init file string is not utf8".to_string()))
}

fn read_u32_vector(raw: &[u8]) -> Result<Vec<u32>> {
    if raw.len() % 4 != 0 {
        return Err(PlatterError::Internal(
            "init file vector frame is misaligned".to_string(),
        ));
    }
    let mut cur = Cursor::new(raw);
    let mut out = Vec::with_capacity(raw.len() / 4);
    for _ in 0..raw.len() / 4 {
        out.push(cur.read_u32::<LittleEndian>()?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::bootstrap::{btree_am, strategy_vector, support_vector};
    use crate::common::relation::TupleLayout;
    use crate::common::scalar::ScalarType;

    fn sample_index_desc() -> RelDesc {
        let am = btree_am();
        let form = RelationForm {
            id: 7,
            name: "sys_table_id_index".to_string(),
            kind: RelKind::Index,
            owner: 6,
            is_shared: false,
            column_count: 1,
            storage_manager: 0,
            has_rules: false,
            has_indexes: false,
            am_id: am.id,
        };
        RelDesc {
            nailed: true,
            local_to_xact: false,
            is_temp: false,
            layout: TupleLayout::new(
                vec![ScalarType::Oid.nullable(true)],
                vec!["id".to_string()],
            )
            .unwrap(),
            strategy: strategy_vector(&am, 1),
            support: support_vector(&am, 1),
            am: Some(am),
            rules: Vec::new(),
            file_open: false,
            lock_tag: form.id,
            form,
        }
    }

    #[test]
    fn image_round_trips_bit_identically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let descs = vec![sample_index_desc()];
        write(dir.path(), &descs)?;
        let first = fs::read(dir.path().join(INIT_FILENAME))?;

        let back = read(dir.path())?;
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].form, descs[0].form);
        assert_eq!(back[0].layout, descs[0].layout);
        assert_eq!(back[0].strategy, descs[0].strategy);
        assert_eq!(back[0].support, descs[0].support);
        assert!(back[0].nailed);

        // writing what we read produces the same bytes
        write(dir.path(), &back)?;
        let second = fs::read(dir.path().join(INIT_FILENAME))?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn unreadable_image_reports_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(INIT_FILENAME), b"garbage")?;
        assert!(read(dir.path()).is_err());
        Ok(())
    }
}

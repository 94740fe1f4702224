use super::{create, file_of, reopen, ro, wo};
use crate::repair_db_single;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn close_then_reopen_restores_state() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"a", b"1")?;
        db.put(&wo(), b"b", b"2")?;
        db.remove(&wo(), b"a")?;
        db.close()?;
    }

    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"a")?, None);
    assert_eq!(db.get(&ro(), b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn drop_checkpoints_like_close() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"k", b"v")?;
        // dropped without close()
    }
    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn reopen_survives_missing_sidecars() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"a", b"1")?;
        db.put(&wo(), b"b", b"2")?;
        db.remove(&wo(), b"b")?;
        db.close()?;
    }

    // lose the index and keeper: only the data log remains
    fs::remove_file(file_of(dir.path(), "index"))?;
    fs::remove_file(file_of(dir.path(), "keeper"))?;

    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"a")?, Some(b"1".to_vec()));
    assert_eq!(db.get(&ro(), b"b")?, None);
    Ok(())
}

#[test]
fn crash_truncated_tail_keeps_synced_writes() -> Result<()> {
    let dir = tempdir()?;
    let full_len;
    let synced_len;
    {
        let db = create(dir.path());
        db.put(
            &crate::WriteOptions {
                sync: true,
                ..crate::WriteOptions::default()
            },
            b"x",
            b"1",
        )?;
        synced_len = db.data_file_size();
        db.put(&wo(), b"y", &vec![b'y'; 512])?;
        full_len = db.data_file_size();
        db.close()?;
    }

    // crash simulation: the unsynced record only half reached the disk
    let data_path = file_of(dir.path(), "data");
    let data = fs::read(&data_path)?;
    assert_eq!(data.len() as u64, full_len);
    fs::write(&data_path, &data[..(synced_len as usize + 100)])?;

    // the sidecars now describe a longer file; open must fall back to a
    // rebuild and drop the torn tail
    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"x")?, Some(b"1".to_vec()));
    assert_eq!(db.get(&ro(), b"y")?, None);
    Ok(())
}

#[test]
fn tail_past_checkpoint_is_replayed() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"old", b"1")?;
        db.close()?;
    }
    {
        // write more, close again: checkpoint covers everything
        let db = reopen(dir.path());
        db.put(&wo(), b"new", b"2")?;
        db.remove(&wo(), b"old")?;
        db.close()?;
    }

    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"old")?, None);
    assert_eq!(db.get(&ro(), b"new")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn stale_checkpoint_with_fresh_tail_replays_the_difference() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"a", b"1")?;
        db.close()?;
    }
    // snapshot the sidecars as of the first close
    let index_bak = fs::read(file_of(dir.path(), "index"))?;
    let keeper_bak = fs::read(file_of(dir.path(), "keeper"))?;
    {
        let db = reopen(dir.path());
        db.put(&wo(), b"b", b"2")?;
        db.put(&wo(), b"a", b"3")?;
        db.close()?;
    }
    // wind the sidecars back: the data tail is no longer covered
    fs::write(file_of(dir.path(), "index"), index_bak)?;
    fs::write(file_of(dir.path(), "keeper"), keeper_bak)?;

    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"a")?, Some(b"3".to_vec()));
    assert_eq!(db.get(&ro(), b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn corrupt_checkpoint_triggers_rebuild() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"k", b"v")?;
        db.close()?;
    }

    // flip a byte in the checkpoint body
    let index_path = file_of(dir.path(), "index");
    let mut raw = fs::read(&index_path)?;
    let last = raw.len() - 1;
    raw[last] ^= 0xFF;
    fs::write(&index_path, raw)?;

    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn explicit_removes_survive_rebuild() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"kept", b"v")?;
        db.put(&wo(), b"plain", b"v")?;
        db.put(&wo(), b"explicit", b"v")?;
        db.remove(&wo(), b"plain")?;
        db.explicit_remove(&wo(), b"explicit")?;

        // a full rebuild must keep the explicit delete indexed instead of
        // collapsing it into an ordinary removal
        db.simple_repair()?;
        assert_eq!(db.get(&ro(), b"kept")?, Some(b"v".to_vec()));
        assert_eq!(db.get(&ro(), b"plain")?, None);
        assert_eq!(db.get(&ro(), b"explicit")?, None);
        db.close()?;
    }

    // the rebuilt checkpoint lists the explicitly-removed key (pointing at
    // its delete record); the plainly-removed key is gone
    let (_, pairs) = crate::checkpoint::load(&file_of(dir.path(), "index"))?;
    let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
    assert!(keys.contains(&&b"kept"[..]));
    assert!(keys.contains(&&b"explicit"[..]));
    assert!(!keys.contains(&&b"plain"[..]));

    // reopening off that checkpoint still reads the key as deleted
    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"explicit")?, None);
    Ok(())
}

#[test]
fn explicit_removes_survive_tail_replay() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"k", b"v")?;
        db.close()?;
    }
    // sidecars cover only the put; the explicit delete lands in the tail
    let index_bak = fs::read(file_of(dir.path(), "index"))?;
    let keeper_bak = fs::read(file_of(dir.path(), "keeper"))?;
    {
        let db = reopen(dir.path());
        db.explicit_remove(&wo(), b"k")?;
        db.close()?;
    }
    fs::write(file_of(dir.path(), "index"), index_bak)?;
    fs::write(file_of(dir.path(), "keeper"), keeper_bak)?;

    {
        let db = reopen(dir.path());
        assert_eq!(db.get(&ro(), b"k")?, None);
        db.close()?;
    }
    let (_, pairs) = crate::checkpoint::load(&file_of(dir.path(), "index"))?;
    assert!(pairs.iter().any(|(k, _)| k.as_slice() == &b"k"[..]));
    Ok(())
}

#[test]
fn simple_repair_rebuilds_in_place() -> Result<()> {
    let dir = tempdir()?;
    let db = create(dir.path());
    db.put(&wo(), b"a", b"1")?;
    db.remove(&wo(), b"a")?;
    db.put(&wo(), b"b", b"2")?;

    db.simple_repair()?;
    assert_eq!(db.get(&ro(), b"a")?, None);
    assert_eq!(db.get(&ro(), b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn repair_db_single_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        db.put(&wo(), b"k", b"v")?;
        db.close()?;
    }
    fs::remove_file(file_of(dir.path(), "index"))?;

    assert!(repair_db_single(dir.path().join("db"))?);
    assert!(file_of(dir.path(), "index").exists());

    let db = reopen(dir.path());
    assert_eq!(db.get(&ro(), b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn repair_db_single_reports_nothing_to_repair() -> Result<()> {
    let dir = tempdir()?;
    assert!(!repair_db_single(dir.path().join("absent"))?);

    // a directory without a data file is not a database
    fs::create_dir_all(dir.path().join("husk"))?;
    assert!(!repair_db_single(dir.path().join("husk"))?);
    Ok(())
}

#[test]
fn many_keys_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = create(dir.path());
        for i in 0..1_000u32 {
            db.put(
                &wo(),
                format!("key{i:04}").as_bytes(),
                format!("val{i}").as_bytes(),
            )?;
        }
        for i in (0..1_000u32).step_by(3) {
            db.remove(&wo(), format!("key{i:04}").as_bytes())?;
        }
        db.close()?;
    }

    let db = reopen(dir.path());
    for i in 0..1_000u32 {
        let got = db.get(&ro(), format!("key{i:04}").as_bytes())?;
        if i % 3 == 0 {
            assert_eq!(got, None, "key{i:04} should be deleted");
        } else {
            assert_eq!(got, Some(format!("val{i}").into_bytes()), "key{i:04}");
        }
    }
    Ok(())
}

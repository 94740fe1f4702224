use super::Fixture;
use crate::{Index, RegexIter, TreeIter};
use std::sync::{Arc, Mutex};
use usr::{RegexJudge, Usr, UsrJudge};

fn collect(iter: &mut TreeIter, index: &Index) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(pair) = iter.next(index).unwrap() {
        out.push(pair);
    }
    out
}

fn collect_regex(iter: &mut RegexIter, index: &Index) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(pair) = iter.next(index).unwrap() {
        out.push(pair);
    }
    out
}

#[test]
fn plain_iteration_in_tree_order() {
    let mut fx = Fixture::new();
    for (k, v) in [
        (b"pear" as &[u8], b"4" as &[u8]),
        (b"apple", b"1"),
        (b"zebra", b"5"),
        (b"apricot", b"2"),
        (b"banana", b"3"),
    ] {
        fx.put(k, v);
    }

    let mut iter = TreeIter::new(&fx.index, fx.index.seq_gen().current());
    let got = collect(&mut iter, &fx.index);
    let keys: Vec<&[u8]> = got.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"apple" as &[u8], b"apricot", b"banana", b"pear", b"zebra"]);
    assert_eq!(got[0].1, b"1");
}

#[test]
fn iterator_does_not_see_later_writes() {
    let mut fx = Fixture::new();
    fx.put(b"a", b"old");

    let mut iter = TreeIter::new(&fx.index, fx.index.seq_gen().current());
    fx.put(b"a", b"new");
    fx.put(b"b", b"fresh");

    let got = collect(&mut iter, &fx.index);
    assert_eq!(got, vec![(b"a".to_vec(), b"old".to_vec())]);
}

#[test]
fn tombstones_are_skipped() {
    let mut fx = Fixture::new();
    fx.put(b"a", b"1");
    fx.put(b"b", b"2");
    fx.put(b"c", b"3");
    fx.del(b"b");

    let mut iter = TreeIter::new(&fx.index, fx.index.seq_gen().current());
    let keys: Vec<Vec<u8>> = collect(&mut iter, &fx.index).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec()]);
}

#[test]
fn seek_repositions_the_iterator() {
    let mut fx = Fixture::new();
    for k in [b"aa" as &[u8], b"bb", b"cc", b"dd", b"ee"] {
        fx.put(k, b"v");
    }

    let mut iter = TreeIter::new(&fx.index, fx.index.seq_gen().current());
    iter.seek(&fx.index, b"cc");
    let keys: Vec<Vec<u8>> = collect(&mut iter, &fx.index).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"cc".to_vec(), b"dd".to_vec(), b"ee".to_vec()]);

    // seeking between keys lands on the successor
    iter.seek(&fx.index, b"ca");
    let keys: Vec<Vec<u8>> = collect(&mut iter, &fx.index).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"cc".to_vec(), b"dd".to_vec(), b"ee".to_vec()]);

    // seeking past the end yields nothing
    iter.seek(&fx.index, b"zz");
    assert!(collect(&mut iter, &fx.index).is_empty());
}

#[test]
fn later_iterator_merges_pending_inserts() {
    let mut fx = Fixture::new();
    fx.put(b"b", b"2");

    // first iterator freezes the structure
    let mut first = TreeIter::new(&fx.index, fx.index.seq_gen().current());
    fx.put(b"a", b"1"); // new key: deferred
    fx.put(b"c", b"3"); // new key: deferred

    // a second iterator created now must observe the deferred keys, merged
    // in order
    let mut second = TreeIter::new(&fx.index, fx.index.seq_gen().current());
    let keys: Vec<Vec<u8>> = collect(&mut second, &fx.index).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    // the first iterator's view is unchanged
    let keys: Vec<Vec<u8>> = collect(&mut first, &fx.index).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"b".to_vec()]);
}

/// Judge wrapper that records every exact-match probe, to show pruned
/// subtrees are never visited.
struct RecordingJudge {
    inner: RegexJudge,
    probed: Mutex<Vec<Vec<u8>>>,
}

impl UsrJudge for RecordingJudge {
    fn possible(&self, input: &Usr) -> bool {
        self.inner.possible(input)
    }

    fn matches(&self, input: &Usr) -> bool {
        self.probed.lock().unwrap().push(input.data().to_vec());
        self.inner.matches(input)
    }
}

#[test]
fn regex_iteration_filters_and_prunes() {
    let mut fx = Fixture::new();
    for k in [b"a" as &[u8], b"ab", b"b", b"ba"] {
        fx.put(k, b"v");
    }

    let judge = Arc::new(RecordingJudge {
        inner: RegexJudge::new("a.*").unwrap(),
        probed: Mutex::new(Vec::new()),
    });
    let dynamic: Arc<dyn UsrJudge + Send + Sync> = judge.clone();

    let mut iter = RegexIter::new(&fx.index, dynamic, fx.index.seq_gen().current(), false);
    let keys: Vec<Vec<u8>> = collect_regex(&mut iter, &fx.index)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"ab".to_vec()]);

    // the subtree holding "b" and "ba" was pruned on partial bits: no
    // exact-match probe ever saw a key starting with 'b'
    for probed in judge.probed.lock().unwrap().iter() {
        assert_eq!(probed.first(), Some(&b'a'));
    }
}

#[test]
fn regex_iteration_reversed() {
    let mut fx = Fixture::new();
    for k in [b"a" as &[u8], b"ab", b"abc", b"b"] {
        fx.put(k, b"v");
    }

    let judge: Arc<dyn UsrJudge + Send + Sync> = Arc::new(RegexJudge::new("a.*").unwrap());
    let mut iter = RegexIter::new(&fx.index, judge, fx.index.seq_gen().current(), true);
    let keys: Vec<Vec<u8>> = collect_regex(&mut iter, &fx.index)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"abc".to_vec(), b"ab".to_vec(), b"a".to_vec()]);
}

#[test]
fn regex_iterator_merges_pending_matches() {
    let mut fx = Fixture::new();
    fx.put(b"apple", b"1");

    let hold = TreeIter::new(&fx.index, fx.index.seq_gen().current());
    fx.put(b"apricot", b"2"); // deferred
    fx.put(b"banana", b"3"); // deferred

    let judge: Arc<dyn UsrJudge + Send + Sync> = Arc::new(RegexJudge::new("ap.*").unwrap());
    let mut iter = RegexIter::new(&fx.index, judge, fx.index.seq_gen().current(), false);
    let keys: Vec<Vec<u8>> = collect_regex(&mut iter, &fx.index)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"apple".to_vec(), b"apricot".to_vec()]);
    drop(hold);
}

#[test]
fn regex_over_empty_index_is_empty() {
    let fx = Fixture::new();
    let judge: Arc<dyn UsrJudge + Send + Sync> = Arc::new(RegexJudge::new(".*").unwrap());
    let mut iter = RegexIter::new(&fx.index, judge, u64::MAX, false);
    assert!(collect_regex(&mut iter, &fx.index).is_empty());
}

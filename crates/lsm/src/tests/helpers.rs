use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tuple::{ComponentCursor, Field, FieldComparator, KeyComparator, KeyRange, Tuple};

use crate::component::{Component, ComponentId, ComponentKind};
use crate::cursor::{LsmSearchCursor, MergeSource};
use crate::error::LsmResult;

pub fn cmp() -> Arc<dyn KeyComparator> {
    Arc::new(FieldComparator::new(1))
}

pub fn row(k: i64, v: &str) -> Tuple {
    Tuple::new(vec![Field::Int(k), Field::from(v)])
}

pub fn tomb(k: i64) -> Tuple {
    Tuple::antimatter(vec![Field::Int(k)])
}

pub fn key(k: i64) -> Tuple {
    Tuple::new(vec![Field::Int(k)])
}

/// `(key, payload)` pairs of live tuples; antimatter shows up as `"-"`.
pub fn pairs(tuples: &[Tuple]) -> Vec<(i64, String)> {
    tuples
        .iter()
        .map(|t| {
            let k = match t.field(0) {
                Some(Field::Int(k)) => *k,
                other => panic!("unexpected key field {:?}", other),
            };
            let v = if t.is_antimatter() {
                "-".to_string()
            } else {
                match t.field(1) {
                    Some(Field::Str(s)) => s.clone(),
                    other => panic!("unexpected payload {:?}", other),
                }
            };
            (k, v)
        })
        .collect()
}

/// Pulls every remaining tuple out of an open cursor.
pub fn drain(cursor: &mut LsmSearchCursor) -> LsmResult<Vec<Tuple>> {
    let mut out = Vec::new();
    while cursor.has_next()? {
        out.push(cursor.advance()?.clone());
    }
    Ok(out)
}

/// Counters shared between a scripted component and all its cursors.
#[derive(Debug, Default)]
pub struct Tally {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub advances: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl Tally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// A component cursor replaying a fixed tuple list, with fault injection.
pub struct ScriptedCursor {
    tuples: VecDeque<Tuple>,
    current: Option<Tuple>,
    tally: Arc<Tally>,
    /// `has_next` fails once this many tuples have been handed out.
    fail_after: Option<usize>,
    fail_close: bool,
    handed_out: usize,
    closed: bool,
}

impl ScriptedCursor {
    pub fn new(tuples: Vec<Tuple>, tally: Arc<Tally>) -> Self {
        tally.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            tuples: tuples.into(),
            current: None,
            tally,
            fail_after: None,
            fail_close: false,
            handed_out: 0,
            closed: false,
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn boxed(self) -> Box<dyn ComponentCursor> {
        Box::new(self)
    }
}

impl ComponentCursor for ScriptedCursor {
    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            bail!("has_next on closed scripted cursor");
        }
        if self.fail_after == Some(self.handed_out) {
            bail!("injected read fault after {} tuples", self.handed_out);
        }
        Ok(!self.tuples.is_empty())
    }

    fn advance(&mut self) -> Result<()> {
        if self.closed {
            bail!("advance on closed scripted cursor");
        }
        match self.tuples.pop_front() {
            Some(t) => {
                self.current = Some(t);
                self.handed_out += 1;
                self.tally.advances.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => bail!("advance past end"),
        }
    }

    fn current(&self) -> Option<&Tuple> {
        self.current.as_ref()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("scripted cursor closed twice");
        }
        self.closed = true;
        self.current = None;
        self.tally.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            bail!("injected close fault");
        }
        Ok(())
    }
}

/// A component whose cursors replay `tuples` (range is ignored).
pub struct ScriptedComponent {
    id: ComponentId,
    kind: ComponentKind,
    tuples: Vec<Tuple>,
    pub tally: Arc<Tally>,
    fail_open: bool,
    fail_after: Option<usize>,
}

impl ScriptedComponent {
    pub fn disk(id: u64, tuples: Vec<Tuple>) -> Arc<Self> {
        Arc::new(Self::build(id, ComponentKind::Disk, tuples))
    }

    pub fn memory(id: u64, tuples: Vec<Tuple>) -> Arc<Self> {
        Arc::new(Self::build(id, ComponentKind::Memory, tuples))
    }

    pub fn failing_open(id: u64) -> Arc<Self> {
        let mut c = Self::build(id, ComponentKind::Disk, Vec::new());
        c.fail_open = true;
        Arc::new(c)
    }

    pub fn failing_after(id: u64, tuples: Vec<Tuple>, n: usize) -> Arc<Self> {
        let mut c = Self::build(id, ComponentKind::Disk, tuples);
        c.fail_after = Some(n);
        Arc::new(c)
    }

    fn build(id: u64, kind: ComponentKind, tuples: Vec<Tuple>) -> Self {
        Self {
            id: ComponentId(id),
            kind,
            tuples,
            tally: Tally::new(),
            fail_open: false,
            fail_after: None,
        }
    }
}

impl Component for ScriptedComponent {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.tuples.len()
    }

    fn open_cursor(&self, _range: &KeyRange) -> Result<Box<dyn ComponentCursor>> {
        if self.fail_open {
            bail!("injected open fault on {}", self.id);
        }
        let mut cursor = ScriptedCursor::new(self.tuples.clone(), Arc::clone(&self.tally));
        if let Some(n) = self.fail_after {
            cursor = cursor.failing_after(n);
        }
        Ok(cursor.boxed())
    }

    fn destroy(&self) -> Result<()> {
        if self.tally.destroyed.fetch_add(1, Ordering::SeqCst) > 0 {
            bail!("{} destroyed twice", self.id);
        }
        Ok(())
    }
}

/// Merge sources over plain tuple lists, ranked by position.
pub fn sources(lists: Vec<Vec<Tuple>>) -> (Vec<MergeSource>, Vec<Arc<Tally>>) {
    let mut tallies = Vec::new();
    let sources = lists
        .into_iter()
        .enumerate()
        .map(|(rank, tuples)| {
            let tally = Tally::new();
            tallies.push(Arc::clone(&tally));
            MergeSource::new(rank, ScriptedCursor::new(tuples, tally).boxed())
        })
        .collect();
    (sources, tallies)
}

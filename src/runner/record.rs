//! 发生记录：每轮结束后的标识快照，以及写出 CSV 报表的观察者。
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use itertools::Itertools;

use crate::net::structure::{TokenCounts, Weight};
use crate::runner::RunOutcome;

/// Place id → full color map, in lexical place order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkingSnapshot(pub Vec<(String, TokenCounts)>);

impl MarkingSnapshot {
    pub fn get(&self, place: &str) -> Option<&TokenCounts> {
        self.0
            .iter()
            .find(|(id, _)| id == place)
            .map(|(_, counts)| counts)
    }

    /// 某库所所有颜色的令牌总数；未知库所为 0。
    pub fn total(&self, place: &str) -> Weight {
        self.get(place)
            .map_or(0, |counts| counts.values().fold(0, |sum, &w| sum.saturating_add(w)))
    }

    pub fn places(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(id, _)| id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRecord {
    pub round: u64,
    pub transition: String,
    /// `false` 表示本轮只挂起了一个外部迁移
    pub fired: bool,
    pub marking: MarkingSnapshot,
}

pub trait FiringObserver {
    fn run_started(&mut self, _initial: &MarkingSnapshot) -> io::Result<()> {
        Ok(())
    }

    fn round_completed(&mut self, record: &RoundRecord) -> io::Result<()>;

    fn run_finished(&mut self, _outcome: &RunOutcome) -> io::Result<()> {
        Ok(())
    }
}

pub type RoundLog = Rc<RefCell<Vec<RoundRecord>>>;

/// Keeps every round in memory behind a shared handle.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    log: RoundLog,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> RoundLog {
        Rc::clone(&self.log)
    }
}

impl FiringObserver for RecordingObserver {
    fn round_completed(&mut self, record: &RoundRecord) -> io::Result<()> {
        self.log.borrow_mut().push(record.clone());
        Ok(())
    }
}

/// CSV 报表：表头 `Round,Transition,<库所…>`，第 0 行为初始标识，之后每轮一行，
/// 单元格为该库所各颜色令牌之和。
#[derive(Debug)]
pub struct FiringWriter<W: Write> {
    out: W,
    quoted: bool,
}

impl FiringWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> FiringWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, quoted: true }
    }

    pub fn quoted(mut self, quoted: bool) -> Self {
        self.quoted = quoted;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn text(&self, value: &str) -> String {
        if self.quoted {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }

    pub fn header(&self, snapshot: &MarkingSnapshot) -> String {
        ["Round", "Transition"]
            .into_iter()
            .chain(snapshot.places())
            .map(|column| self.text(column))
            .join(",")
    }

    pub fn row(&self, round: u64, transition: &str, snapshot: &MarkingSnapshot) -> String {
        let cells = snapshot
            .0
            .iter()
            .map(|(_, counts)| counts.values().sum::<Weight>().to_string());
        [round.to_string(), self.text(transition)]
            .into_iter()
            .chain(cells)
            .join(",")
    }
}

impl<W: Write> FiringObserver for FiringWriter<W> {
    fn run_started(&mut self, initial: &MarkingSnapshot) -> io::Result<()> {
        let header = self.header(initial);
        let row = self.row(0, "", initial);
        writeln!(self.out, "{header}")?;
        writeln!(self.out, "{row}")
    }

    fn round_completed(&mut self, record: &RoundRecord) -> io::Result<()> {
        let row = self.row(record.round, &record.transition, &record.marking);
        writeln!(self.out, "{row}")
    }

    fn run_finished(&mut self, _outcome: &RunOutcome) -> io::Result<()> {
        self.out.flush()
    }
}

//! Append-only text streams on disk, one file per (vessel, channel).
//!
//! Layout: `<root>/<channel>/vial<N>_<channel>.txt`. Each file starts with a
//! header line naming the columns; every following line is one record with
//! comma-separated fields, experiment time first.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use evolver_traits::{Channel, LogStore, Record};
use tracing::debug;

use crate::error::{IoError, Result};

pub const DELIMITER: &str = ",";

/// Bytes read per step when scanning a file backwards.
const BLOCK: u64 = 8 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, vessel: usize, channel: Channel) -> PathBuf {
        let name = channel.name();
        self.root.join(name).join(format!("vial{vessel}_{name}.txt"))
    }

    /// Create every missing stream of `vessel` with its header line.
    /// Returns how many files were created.
    pub fn create_streams(&self, vessel: usize) -> Result<usize> {
        let mut created = 0;
        for channel in Channel::ALL {
            let path = self.path_for(vessel, channel);
            if path.exists() {
                continue;
            }
            open_for_append(&path, channel)?;
            created += 1;
        }
        debug!(vessel, created, root = %self.root.display(), "streams created");
        Ok(created)
    }

    /// Up to `n` most recent records of one stream.
    pub fn read_tail(&self, vessel: usize, channel: Channel, n: usize) -> Result<Vec<Record>> {
        let path = self.path_for(vessel, channel);
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let (lines, from_start) = tail_lines(&mut file, n)?;
        let mut lines = lines.into_iter().peekable();
        if from_start && lines.peek().is_some_and(|l| is_header(l)) {
            lines.next();
        }
        let lines: Vec<String> = lines.collect();
        let skip = lines.len().saturating_sub(n);
        lines[skip..]
            .iter()
            .map(|l| parse_line(&path, l))
            .collect()
    }

    /// Record count of one stream, header excluded.
    pub fn count(&self, vessel: usize, channel: Channel) -> Result<usize> {
        let file = match File::open(self.path_for(vessel, channel)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || (i == 0 && is_header(&line)) {
                continue;
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn write_record(&self, vessel: usize, channel: Channel, record: &[String]) -> Result<()> {
        let path = self.path_for(vessel, channel);
        if record.iter().any(|f| f.contains('\n')) {
            return Err(IoError::Parse {
                path,
                msg: "record field contains a line break".into(),
            });
        }
        let mut line = record.join(DELIMITER);
        line.push('\n');
        let mut file = open_for_append(&path, channel)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl LogStore for FileLogStore {
    fn tail(&self, vessel: usize, channel: Channel, n: usize) -> std::result::Result<Vec<Record>, BoxError> {
        Ok(self.read_tail(vessel, channel, n)?)
    }

    fn append(&mut self, vessel: usize, channel: Channel, record: &[String]) -> std::result::Result<(), BoxError> {
        Ok(self.write_record(vessel, channel, record)?)
    }

    fn len(&self, vessel: usize, channel: Channel) -> std::result::Result<usize, BoxError> {
        Ok(self.count(vessel, channel)?)
    }
}

fn open_for_append(path: &Path, channel: Channel) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        let header = channel.columns().join(DELIMITER);
        file.write_all(format!("{header}\n").as_bytes())?;
    }
    Ok(file)
}

/// A first line whose leading field is not a number.
fn is_header(line: &str) -> bool {
    line.split(DELIMITER)
        .next()
        .is_none_or(|f| f.trim().parse::<f64>().is_err())
}

fn parse_line(path: &Path, line: &str) -> Result<Record> {
    let record: Record = line.split(DELIMITER).map(str::to_string).collect();
    match record.first().map(|t| t.trim().parse::<f64>()) {
        Some(Ok(_)) => Ok(record),
        _ => Err(IoError::Parse {
            path: path.to_path_buf(),
            msg: format!("record does not start with a time: {line:?}"),
        }),
    }
}

/// At least `n` complete non-empty lines from the end of `file`, or all of
/// them. The flag is set when the returned lines start at the beginning of
/// the file.
fn tail_lines(file: &mut File, n: usize) -> Result<(Vec<String>, bool)> {
    let mut pos = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let step = BLOCK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; usize::try_from(step).unwrap_or(usize::MAX)];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;

        let text = String::from_utf8_lossy(&buf);
        let mut segments: Vec<&str> = text.split('\n').collect();
        if pos > 0 && !segments.is_empty() {
            // partial line
            segments.remove(0);
        }
        let lines: Vec<String> = segments
            .into_iter()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        if pos == 0 || lines.len() >= n {
            return Ok((lines, pos == 0));
        }
    }
}

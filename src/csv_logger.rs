use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Local;
use tracing::{info, warn};

use crate::error::Error;

type LogWriter = Box<dyn Write + Send>;

type WrapFile = Box<dyn Fn(File) -> LogWriter + Send + Sync>;

struct OpenLog {
    path: PathBuf,
    writer: csv::Writer<LogWriter>,
}

/// Appends rows to a CSV file, flushing after each one.
///
/// A session starts with [`CsvLogger::open`] and ends with [`CsvLogger::close`].
pub struct CsvLogger {
    log_dir: PathBuf,
    header: Vec<String>,
    wrap: WrapFile,
    open: Option<OpenLog>,
}

impl CsvLogger {
    /// A logger which places its default files in the given directory.
    pub fn new<P: AsRef<Path>, S: AsRef<str>>(log_dir: P, header: &[S]) -> Self {
        Self {
            log_dir: log_dir.as_ref().into(),
            header: header.iter().map(|s| s.as_ref().to_owned()).collect(),
            wrap: Box::new(|file| Box::new(file)),
            open: None,
        }
    }

    /// Write through `wrap` instead of straight to each opened file.
    pub fn with_writer<F, W>(mut self, wrap: F) -> Self
    where
        F: Fn(File) -> W + Send + Sync + 'static,
        W: Write + Send + 'static,
    {
        self.wrap = Box::new(move |file| Box::new(wrap(file)));
        self
    }

    /// The file name used when no explicit path is given.
    pub fn default_file_name() -> String {
        format!(
            "sensor_output_with_timestamps_{}.csv",
            Local::now().format("%Y%m%d-%H%M%S")
        )
    }

    /// Start a new log file.
    ///
    /// Any existing file at the path is replaced, never appended to.
    /// The header is written (and flushed) only when the file is empty.
    /// Returns the path of the file in use.
    pub fn open(&mut self, path: Option<PathBuf>) -> Result<PathBuf, Error> {
        // Don't leak a previous session.
        self.close();

        fs::create_dir_all(&self.log_dir)?;

        let path = path.unwrap_or_else(|| self.log_dir.join(Self::default_file_name()));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            fs::remove_file(&path)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer((self.wrap)(file));

        if is_empty {
            writer.write_record(&self.header)?;
            writer.flush()?;
        }

        info!(?path, "Logging CSV rows");

        self.open = Some(OpenLog {
            path: path.clone(),
            writer,
        });

        Ok(path)
    }

    /// Append a row and flush it to disk.
    pub fn write<I, T>(&mut self, row: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let log = self.open.as_mut().ok_or(Error::LogNotOpen)?;

        log.writer.write_record(row)?;
        log.writer.flush()?;

        Ok(())
    }

    /// The path of the current file, if open.
    pub fn path(&self) -> Option<&Path> {
        self.open.as_ref().map(|log| log.path.as_path())
    }

    /// Whether a file is open.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Release the file. Closing twice is fine.
    pub fn close(&mut self) {
        if let Some(mut log) = self.open.take() {
            if let Err(e) = log.writer.flush() {
                warn!(?e, path = ?log.path, "Could not flush log file on close");
            }
            info!(path = ?log.path, "Closed log file");
        }
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::CSV_HEADER;

    /// Writes go to the file until told to fail.
    struct Breakable {
        file: File,
        broken: Arc<AtomicBool>,
    }

    impl Write for Breakable {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.file.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.file.flush()
        }
    }

    const HEADER_LINE: &str = "timestamp,acel_x,acel_y,acel_z,gyro_x,gyro_y,gyro_z";

    fn logger(dir: &tempfile::TempDir) -> CsvLogger {
        CsvLogger::new(dir.path(), &CSV_HEADER)
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(ToOwned::to_owned)
            .collect()
    }

    #[test]
    fn open_close_gives_only_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = logger(&dir);

        let path = log.open(None).unwrap();
        log.close();

        assert_eq!(lines(&path), vec![HEADER_LINE]);
    }

    #[test]
    fn default_name_is_in_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvLogger::new(dir.path().join("nested"), &CSV_HEADER);

        let path = log.open(None).unwrap();

        assert_eq!(path.parent().unwrap(), dir.path().join("nested"));
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("sensor_output_with_timestamps_"));
        assert!(name.ends_with(".csv"));
    }

    #[test]
    fn rows_are_flushed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = logger(&dir);
        let path = log.open(Some(dir.path().join("rows.csv"))).unwrap();

        log.write(["2024-03-01 12:00:00.000", "1.0", "2.0", "3.0", "4.0", "5.0", "6.0"])
            .unwrap();
        log.write(["2024-03-01 12:00:00.001", "garbage"]).unwrap();

        // Still open, but the rows are on disk.
        assert_eq!(
            lines(&path),
            vec![
                HEADER_LINE,
                "2024-03-01 12:00:00.000,1.0,2.0,3.0,4.0,5.0,6.0",
                "2024-03-01 12:00:00.001,garbage",
            ]
        );
    }

    #[test]
    fn raw_with_commas_stays_one_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = logger(&dir);
        let path = log.open(Some(dir.path().join("quoted.csv"))).unwrap();

        log.write(["ts", "1,2,3"]).unwrap();
        log.close();

        assert_eq!(lines(&path)[1], r#"ts,"1,2,3""#);
    }

    #[test]
    fn existing_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replace.csv");
        fs::write(&path, "old contents\n").unwrap();

        let mut log = logger(&dir);
        log.open(Some(path.clone())).unwrap();
        log.close();

        assert_eq!(lines(&path), vec![HEADER_LINE]);
    }

    #[test]
    fn header_once_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("again.csv");
        let mut log = logger(&dir);

        log.open(Some(path.clone())).unwrap();
        for i in 0..3 {
            log.write(["ts".to_string(), i.to_string()]).unwrap();
        }
        log.close();

        log.open(Some(path.clone())).unwrap();
        log.write(["ts", "after"]).unwrap();
        log.close();

        let lines = lines(&path);
        assert_eq!(lines, vec![HEADER_LINE, "ts,after"]);
    }

    #[test]
    fn write_before_open_is_usage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = logger(&dir);

        assert!(matches!(log.write(["x"]), Err(Error::LogNotOpen)));
    }

    #[test]
    fn write_after_close_is_usage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = logger(&dir);

        log.open(None).unwrap();
        log.close();
        log.close();

        assert!(!log.is_open());
        assert!(log.path().is_none());
        assert!(matches!(log.write(["x"]), Err(Error::LogNotOpen)));
    }

    #[test]
    fn failing_writer_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = Arc::new(AtomicBool::new(false));
        let mut log = logger(&dir).with_writer({
            let broken = Arc::clone(&broken);
            move |file| Breakable {
                file,
                broken: Arc::clone(&broken),
            }
        });
        let path = log.open(Some(dir.path().join("breakable.csv"))).unwrap();

        log.write(["ts", "fine"]).unwrap();
        broken.store(true, Ordering::SeqCst);

        assert!(matches!(log.write(["ts", "lost"]), Err(Error::LogIo(_))));
        assert_eq!(lines(&path), vec![HEADER_LINE, "ts,fine"]);
    }
}

//! Category-filtered logging for the emulator core.
//!
//! Every subsystem logs through [`log`], which takes a category, a level and a
//! closure producing the message. The closure only runs when the message will
//! actually be written, so log sites in hot paths (instruction dispatch,
//! register writes) cost one atomic load when logging is off.
//!
//! - **LogLevel**: Off < Error < Warn < Info < Debug < Trace
//! - **LogCategory**: CPU, bus, PPU, APU, cartridge, interrupts
//! - **LogConfig**: process-wide levels held in atomics, a per-category rate
//!   limiter, and an optional log file drained by a background thread
//!
//! ```rust
//! use chroma_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Cpu, LogLevel::Debug, || {
//!     format!("speed switch at PC={:04X}", 0x0150)
//! });
//! ```

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse a level name or digit (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Emulator component a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Instruction execution, HALT/STOP, speed switching
    Cpu,
    /// Address dispatch, DMA, snapshot plumbing
    Bus,
    /// Scanline state machine and rendering
    Ppu,
    /// Sound channels and mixer
    Apu,
    /// Header parsing, bank controllers, RTC, battery data
    Cartridge,
    /// Interrupt requests and dispatch
    Interrupts,
}

const CATEGORY_COUNT: usize = 6;

impl LogCategory {
    pub const ALL: [LogCategory; CATEGORY_COUNT] = [
        LogCategory::Cpu,
        LogCategory::Bus,
        LogCategory::Ppu,
        LogCategory::Apu,
        LogCategory::Cartridge,
        LogCategory::Interrupts,
    ];

    fn index(self) -> usize {
        match self {
            LogCategory::Cpu => 0,
            LogCategory::Bus => 1,
            LogCategory::Ppu => 2,
            LogCategory::Apu => 3,
            LogCategory::Cartridge => 4,
            LogCategory::Interrupts => 5,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave this state inconsistent.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Window {
    timestamps: VecDeque<Instant>,
    dropped: usize,
    last_drop_report: Option<Instant>,
}

/// Sliding one-second window per category.
struct RateLimiter {
    max_per_second: AtomicUsize,
    windows: Mutex<[Window; CATEGORY_COUNT]>,
}

impl RateLimiter {
    fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second: AtomicUsize::new(max_per_second),
            windows: Mutex::new(Default::default()),
        }
    }

    /// Returns whether the message may be written, and a dropped-message
    /// count when one is due to be reported.
    fn should_allow(&self, category: LogCategory) -> (bool, Option<usize>) {
        let now = Instant::now();
        let second = Duration::from_secs(1);
        let mut windows = lock(&self.windows);
        let window = &mut windows[category.index()];

        while window
            .timestamps
            .front()
            .is_some_and(|&front| now.duration_since(front) > second)
        {
            window.timestamps.pop_front();
        }

        if window.timestamps.len() < self.max_per_second.load(Ordering::Relaxed) {
            window.timestamps.push_back(now);
            if window.dropped > 0 {
                let dropped = std::mem::take(&mut window.dropped);
                window.last_drop_report = Some(now);
                return (true, Some(dropped));
            }
            return (true, None);
        }

        window.dropped += 1;
        let report_due = window
            .last_drop_report
            .map_or(true, |last| now.duration_since(last) >= second);
        if report_due {
            window.last_drop_report = Some(now);
            (false, Some(std::mem::take(&mut window.dropped)))
        } else {
            (false, None)
        }
    }
}

/// Process-wide logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    category_levels: [AtomicU8; CATEGORY_COUNT],
    log_sender: Mutex<Option<Sender<String>>>,
    file_logging_enabled: AtomicBool,
    rate_limiter: RateLimiter,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            log_sender: Mutex::new(None),
            file_logging_enabled: AtomicBool::new(false),
            rate_limiter: RateLimiter::new(60),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    /// Override the level for one category; `Off` falls back to the global level.
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        match self.get_level(category) {
            LogLevel::Off => level <= self.get_global_level(),
            category_level => level <= category_level,
        }
    }

    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    /// Maximum messages per second per category
    pub fn set_rate_limit(&self, max_logs_per_second: usize) {
        self.rate_limiter
            .max_per_second
            .store(max_logs_per_second, Ordering::Relaxed);
    }

    pub fn get_rate_limit(&self) -> usize {
        self.rate_limiter.max_per_second.load(Ordering::Relaxed)
    }

    /// Append messages to `path` from a background writer thread.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = channel::<String>();

        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    let _ = writeln!(file, "{}", message);
                    let _ = file.flush();
                }
            })?;

        *lock(&self.log_sender) = Some(sender);
        self.file_logging_enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop writing to the log file; the writer thread exits once drained.
    pub fn clear_log_file(&self) {
        *lock(&self.log_sender) = None;
        self.file_logging_enabled.store(false, Ordering::Relaxed);
    }

    fn write_message(&self, message: String) {
        if self.file_logging_enabled.load(Ordering::Relaxed) {
            if let Some(sender) = lock(&self.log_sender).as_ref() {
                if let Err(err) = sender.send(message) {
                    eprintln!("{}", err.0);
                }
                return;
            }
        }
        eprintln!("{}", message);
    }
}

/// Log a lazily formatted message.
///
/// Messages beyond the per-category rate limit are dropped and summarised
/// at most once per second.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if !config.should_log(category, level) {
        return;
    }

    let (allowed, dropped) = config.rate_limiter.should_allow(category);
    if let Some(count) = dropped.filter(|&count| count > 0) {
        config.write_message(format!(
            "[{:?}] rate limit exceeded, {} message(s) dropped",
            category, count
        ));
    }
    if allowed {
        config.write_message(format!("[{:?}] {}", category, message_fn()));
    }
}

use anyhow::Result;
use crossbeam_channel::Sender;
use std::io::{self, Write};
use std::process;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

// Cross-platform signal handling
#[cfg(unix)]
use signal_hook::{consts::SIGINT, consts::SIGPIPE, consts::SIGTERM, iterator::Signals};

// Additional signals for progress printing
#[cfg(all(
    unix,
    any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )
))]
use signal_hook::consts::SIGINFO;

#[cfg(unix)]
use signal_hook::consts::SIGUSR1;

#[cfg(windows)]
use signal_hook::{consts::SIGINT, flag};

/// Standard Unix exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    SignalInt = 130,  // 128 + SIGINT (2)
    SignalPipe = 141, // 128 + SIGPIPE (13)
    SignalTerm = 143, // 128 + SIGTERM (15)
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            130 => Some(ExitCode::SignalInt),
            141 => Some(ExitCode::SignalPipe),
            143 => Some(ExitCode::SignalTerm),
            _ => None,
        }
    }
}

/// Shared cancellation flag, set once by the first shutdown signal.
///
/// Remembers which exit code the interruption maps to.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    code: Arc<AtomicI32>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, exit_code: ExitCode) {
        let _ = self
            .code
            .compare_exchange(0, exit_code as i32, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.code.load(Ordering::SeqCst) != 0
    }

    pub fn exit_code(&self) -> Option<ExitCode> {
        ExitCode::from_code(self.code.load(Ordering::SeqCst))
    }
}

/// Control messages broadcast by the signal handler
#[derive(Debug, Clone)]
pub enum Ctrl {
    Shutdown { immediate: bool },
    PrintStats,
}

/// Signal handler for graceful shutdown
pub struct SignalHandler {
    _handle: thread::JoinHandle<()>,
}

impl SignalHandler {
    /// Initialize signal handling - cross-platform
    pub fn new(ctrl_sender: Sender<Ctrl>, cancel: CancelToken) -> Result<Self> {
        #[cfg(unix)]
        {
            // SIGINFO only exists on BSD-like systems (includes macOS)
            #[cfg(any(
                target_os = "macos",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            let signals_to_handle = [SIGINT, SIGPIPE, SIGTERM, SIGUSR1, SIGINFO];
            #[cfg(not(any(
                target_os = "macos",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            )))]
            let signals_to_handle = [SIGINT, SIGPIPE, SIGTERM, SIGUSR1];

            let mut signals = Signals::new(&signals_to_handle)?;

            let handle = thread::spawn(move || {
                let mut shutdown_count = 0;
                for sig in signals.forever() {
                    match sig {
                        SIGINT | SIGTERM => {
                            let code = if sig == SIGINT {
                                ExitCode::SignalInt
                            } else {
                                tracing::warn!("received SIGTERM, shutting down gracefully");
                                ExitCode::SignalTerm
                            };
                            cancel.cancel(code);
                            shutdown_count += 1;
                            let immediate = shutdown_count > 1;
                            let _ = ctrl_sender.send(Ctrl::Shutdown { immediate });
                            if immediate {
                                code.exit();
                            }
                            // A second SIGINT/SIGTERM exits without waiting for the recorders
                        }
                        SIGPIPE => {
                            cancel.cancel(ExitCode::SignalPipe);
                            ExitCode::SignalPipe.exit();
                        }
                        SIGUSR1 => {
                            let _ = ctrl_sender.send(Ctrl::PrintStats);
                        }
                        #[cfg(all(
                            unix,
                            any(
                                target_os = "macos",
                                target_os = "freebsd",
                                target_os = "openbsd",
                                target_os = "netbsd",
                                target_os = "dragonfly"
                            )
                        ))]
                        SIGINFO => {
                            // CTRL-T on BSD-like systems including macOS
                            let _ = ctrl_sender.send(Ctrl::PrintStats);
                        }
                        _ => {
                            tracing::warn!(signal = sig, "received unexpected signal");
                        }
                    }
                }
            });

            Ok(SignalHandler { _handle: handle })
        }

        #[cfg(windows)]
        {
            let term_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
            flag::register(SIGINT, Arc::clone(&term_flag))?;

            let handle = thread::spawn(move || {
                let mut shutdown_count = 0;
                loop {
                    thread::sleep(std::time::Duration::from_millis(100));
                    if term_flag.swap(false, Ordering::Relaxed) {
                        cancel.cancel(ExitCode::SignalInt);
                        shutdown_count += 1;
                        let immediate = shutdown_count > 1;
                        let _ = ctrl_sender.send(Ctrl::Shutdown { immediate });
                        if immediate {
                            ExitCode::SignalInt.exit();
                        }
                    }
                }
            });

            Ok(SignalHandler { _handle: handle })
        }
    }
}

/// Safe wrapper for writing to stdout that handles broken pipes
pub struct SafeStdout {
    stdout: io::Stdout,
}

impl SafeStdout {
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }

    /// Write a line to stdout; a closed pipe ends the process quietly
    pub fn writeln(&mut self, data: &str) -> Result<()> {
        let mut lock = self.stdout.lock();
        match writeln!(lock, "{}", data).and_then(|_| lock.flush()) {
            Ok(()) => Ok(()),
            Err(e) if Self::is_broken_pipe(&e) => ExitCode::SignalPipe.exit(),
            Err(e) => Err(anyhow::anyhow!("Failed to write to stdout: {}", e)),
        }
    }

    /// Cross-platform broken pipe detection
    fn is_broken_pipe(e: &io::Error) -> bool {
        #[cfg(unix)]
        {
            e.kind() == io::ErrorKind::BrokenPipe
        }
        #[cfg(windows)]
        {
            e.kind() == io::ErrorKind::BrokenPipe
                || e.raw_os_error() == Some(232) // ERROR_NO_DATA "The pipe is being closed"
                || e.raw_os_error() == Some(109) // ERROR_BROKEN_PIPE "The pipe has been ended"
        }
    }
}

impl Default for SafeStdout {
    fn default() -> Self {
        Self::new()
    }
}

//! The `Daemon` state machine: the owned value that threads the daemonization
//! core's phases through a single program run.
//!
//! There is no global/static instance: `Daemon::init1` returns an owned value,
//! and every later phase transition takes `&mut self`.

use crate::error::DaemonError;
use crate::helper::{self, HelperLink, PrivilegedAction};
use crate::logger::Logger;
use crate::path::{self, PidFilePaths};
use crate::phase::{self, Phase};
use crate::pidfile;
use crate::privilege::{self, TargetIdentity};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

// Not exposed by this crate's vendored `libc` version; declared directly
// since it is otherwise identical to the standard libc symbol.
unsafe extern "C" {
    fn tzset();
}

/// Parameters supplied by the caller during phases 1-3. Immutable afterward.
struct Params {
    debug: bool,
    foreground: bool,
    restart: bool,
    name: String,
    username: Option<String>,
    chroot: Option<PathBuf>,
}

/// Values derived from the parameters during phases 2-3.
struct Derived {
    invoked_as_root: bool,
    will_privdrop: bool,
    will_chroot: bool,
    target: Option<TargetIdentity>,
    paths: Option<PidFilePaths>,
}

/// The daemonization state machine. Construct with [`Daemon::init1`], then call
/// the phase-transition methods in order; each checks the phase contract
/// documented on it and returns a typed error instead of aborting, so tests can
/// observe which category fired. A host that wants crash-on-any-error behavior
/// should route every `Err` through [`Daemon::fatal`].
pub struct Daemon {
    logger: Logger,
    phase: Phase,
    params: Params,
    derived: Derived,
    actions: Vec<PrivilegedAction>,
    helper_link: Option<HelperLink>,
    need_helper: bool,
    pidfile_fd: Option<RawFd>,

    called_init2: bool,
    called_init3: bool,
    called_fork: bool,
    called_secure: bool,
    called_acquire_pidfile: bool,
    called_finish: bool,
}

impl Daemon {
    /// Phase 1. The only entry point legal before any `Daemon` exists — which,
    /// in this port, is trivially true: there is no value to call a method on
    /// until this returns one. `use_syslog` opens the system log under `name`.
    pub fn init1(
        name: impl Into<String>,
        debug: bool,
        foreground: bool,
        stderr_info: bool,
        use_syslog: bool,
    ) -> Result<Daemon, DaemonError> {
        let name = name.into();
        let logger = Logger::new(&name, stderr_info, use_syslog)?;

        Ok(Daemon {
            logger,
            phase: Phase::Init1,
            params: Params {
                debug,
                foreground,
                restart: false,
                name,
                username: None,
                chroot: None,
            },
            derived: Derived {
                invoked_as_root: false,
                will_privdrop: false,
                will_chroot: false,
                target: None,
                paths: None,
            },
            actions: Vec::new(),
            helper_link: None,
            need_helper: false,
            pidfile_fd: None,
            called_init2: false,
            called_init3: false,
            called_fork: false,
            called_secure: false,
            called_acquire_pidfile: false,
            called_finish: false,
        })
    }

    /// Phase 2. Records the pid directory and optional chroot, validates both
    /// are absolute and that the chroot target exists, and derives
    /// `invoked_as_root` and the pre-/post-chroot pidfile paths. `pid_dir ==
    /// None` configures no pidfile at all: `status`/`stop`/`signal` then
    /// always report "not running", and `acquire_pidfile` advances the phase
    /// without locking anything.
    pub fn init2(
        &mut self,
        pid_dir: Option<&Path>,
        chroot: Option<&Path>,
    ) -> Result<(), DaemonError> {
        phase::require_after(self.phase, Phase::Init1, "init2");
        phase::require_before(self.phase, Phase::Init3, "init2");
        phase::require_unique(self.called_init2, "init2");
        self.called_init2 = true;

        let invoked_as_root = nix::unistd::geteuid().is_root();
        let paths = path::compute(&self.params.name, pid_dir, chroot, invoked_as_root)?;

        self.derived.invoked_as_root = invoked_as_root;
        self.derived.will_chroot = chroot.is_some() && invoked_as_root;
        self.derived.paths = paths;
        self.params.chroot = chroot.map(Path::to_path_buf);
        self.phase = Phase::Init2;
        Ok(())
    }

    /// Phase 3. Resolves the privdrop target if running as root and a username
    /// was given; rejects a chroot requested without a username to drop to.
    /// Ensures the pre-chroot pid directory exists with the right mode/owner.
    pub fn init3(&mut self, username: Option<&str>, restart: bool) -> Result<(), DaemonError> {
        phase::require_after(self.phase, Phase::Init2, "init3");
        phase::require_before(self.phase, Phase::Forked, "init3");
        phase::require_unique(self.called_init3, "init3");
        self.called_init3 = true;

        self.params.restart = restart;
        self.params.username = username.map(str::to_string);

        if self.derived.invoked_as_root {
            if let Some(username) = username {
                let target = privilege::resolve_user(username)?;
                self.derived.target = Some(target);
                self.derived.will_privdrop = true;
            } else if self.derived.will_chroot {
                return Err(DaemonError::configuration(
                    "a chroot was requested without a username to privdrop to",
                ));
            }
        }

        self.ensure_pid_directory()?;

        self.phase = Phase::Init3;
        Ok(())
    }

    fn ensure_pid_directory(&self) -> Result<(), DaemonError> {
        let Some(paths) = &self.derived.paths else {
            return Ok(());
        };
        let Some(dir) = paths.pre_chroot.parent() else {
            return Ok(());
        };

        std::fs::create_dir_all(dir)?;
        std::fs::set_permissions(
            dir,
            std::fs::Permissions::from_mode(crate::constants::PIDDIR_MODE),
        )?;

        if let Some(target) = self.derived.target {
            nix::unistd::chown(dir, Some(target.uid), Some(target.gid))
                .map_err(|e| DaemonError::system(format!("chown({})", dir.display()), e))?;
        }

        Ok(())
    }

    /// Registers a zero-argument privileged action to be run, after privilege
    /// drop, in the helper process (or in-process if privileges were never
    /// dropped). Must be called before [`Daemon::fork`]. Returns the action's
    /// stable index, used later with [`Daemon::pcall`].
    pub fn add_pcall(&mut self, action: PrivilegedAction) -> Result<usize, DaemonError> {
        phase::require_before(self.phase, Phase::Forked, "add_pcall");
        helper::check_registration_capacity(self.actions.len())?;
        self.actions.push(action);
        Ok(self.actions.len() - 1)
    }

    /// Phase 4. The daemonization engine: forks (once or twice) and assigns
    /// roles between the daemon, an intermediate process, and the retained
    /// privileged helper.
    pub fn fork(&mut self) -> Result<(), DaemonError> {
        phase::require_after(self.phase, Phase::Init3, "fork");
        phase::require_before(self.phase, Phase::Secured, "fork");
        phase::require_unique(self.called_fork, "fork");
        self.called_fork = true;

        self.need_helper = true;

        if self.params.foreground && (!self.derived.will_privdrop || self.actions.is_empty()) {
            self.need_helper = false;
            self.phase = Phase::Forked;
            return Ok(());
        }

        if self.params.foreground {
            self.fork_foreground_with_helper()
        } else {
            self.fork_background()
        }
    }

    fn fork_foreground_with_helper(&mut self) -> Result<(), DaemonError> {
        let (to_helper_read, to_helper_write) = new_pipe()?;
        let (from_helper_read, from_helper_write) = new_pipe()?;

        match unsafe { nix::unistd::fork() }.map_err(|e| DaemonError::system("fork", e))? {
            nix::unistd::ForkResult::Child => {
                close_fd(to_helper_write);
                close_fd(from_helper_read);
                helper::helper_loop(to_helper_read, from_helper_write, &self.actions);
            }
            nix::unistd::ForkResult::Parent { .. } => {
                close_fd(to_helper_read);
                close_fd(from_helper_write);
                self.helper_link = Some(HelperLink {
                    fd_to_helper: to_helper_write,
                    fd_from_helper: from_helper_read,
                });
                self.phase = Phase::Forked;
                Ok(())
            }
        }
    }

    fn fork_background(&mut self) -> Result<(), DaemonError> {
        let (to_helper_read, to_helper_write) = new_pipe()?;
        let (from_helper_read, from_helper_write) = new_pipe()?;

        match unsafe { nix::unistd::fork() }.map_err(|e| DaemonError::system("fork", e))? {
            nix::unistd::ForkResult::Parent { .. } => {
                // The original invoking process becomes the helper. It never
                // returns from the loop; its own exit status is the invoking
                // shell's synchronous signal of daemon startup success.
                close_fd(to_helper_write);
                close_fd(from_helper_read);
                helper::helper_loop(to_helper_read, from_helper_write, &self.actions);
            }
            nix::unistd::ForkResult::Child => {
                close_fd(to_helper_read);
                close_fd(from_helper_write);

                nix::unistd::setsid().map_err(|e| DaemonError::system("setsid", e))?;
                ignore_signal(Signal::SIGHUP)?;
                ignore_signal(Signal::SIGPIPE)?;

                match unsafe { nix::unistd::fork() }
                    .map_err(|e| DaemonError::system("second fork", e))?
                {
                    nix::unistd::ForkResult::Parent { .. } => {
                        // The intermediate parent's only job was to force the
                        // final child to be reparented with no controlling
                        // terminal; it carries no startup-status information.
                        unsafe { libc::_exit(0) }
                    }
                    nix::unistd::ForkResult::Child => {
                        nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o022));
                        redirect_standard_streams_to_null()?;

                        self.helper_link = Some(HelperLink {
                            fd_to_helper: to_helper_write,
                            fd_from_helper: from_helper_read,
                        });
                        self.logger
                            .info(&format!("daemonized, final pid is {}", std::process::id()));
                        self.phase = Phase::Forked;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Phase 5. Enters the chroot (if any) and drops privileges (if any), then
    /// runs the reacquire-root self-test.
    pub fn secure(&mut self) -> Result<(), DaemonError> {
        phase::require_after(self.phase, Phase::Forked, "secure");
        phase::require_before(self.phase, Phase::PidLocked, "secure");
        phase::require_unique(self.called_secure, "secure");
        self.called_secure = true;

        if self.derived.will_chroot {
            unsafe { tzset() };
            let chroot_path = self
                .params
                .chroot
                .clone()
                .ok_or_else(|| DaemonError::bug("will_chroot set without a chroot path"))?;
            privilege::enter_chroot(&chroot_path)?;
        }

        if self.derived.will_privdrop {
            let target = self
                .derived
                .target
                .ok_or_else(|| DaemonError::bug("will_privdrop set without a resolved target"))?;
            privilege::drop_privileges(target)?;
            privilege::verify_dropped(target)?;
        }

        self.phase = Phase::Secured;
        Ok(())
    }

    /// Phase 6. Acquires the exclusive pidfile lock for the current process.
    /// If no pid directory was given to `init2`, there is nothing to lock:
    /// the phase still advances, but no fd is taken.
    pub fn acquire_pidfile(&mut self) -> Result<(), DaemonError> {
        phase::require_after(self.phase, Phase::Secured, "acquire_pidfile");
        phase::require_before(self.phase, Phase::Finished, "acquire_pidfile");
        phase::require_unique(self.called_acquire_pidfile, "acquire_pidfile");
        self.called_acquire_pidfile = true;

        let Some(paths) = &self.derived.paths else {
            self.phase = Phase::PidLocked;
            return Ok(());
        };

        let fd = pidfile::acquire(&paths.post_chroot, self.params.restart)?;
        self.pidfile_fd = Some(fd);
        self.phase = Phase::PidLocked;
        Ok(())
    }

    /// Phase 7. Signals startup success to the helper (if any) and closes the
    /// duplicated stderr sink if backgrounded.
    pub fn finish(&mut self) -> Result<(), DaemonError> {
        phase::require_after(self.phase, Phase::PidLocked, "finish");
        phase::require_unique(self.called_finish, "finish");
        self.called_finish = true;

        if !self.need_helper {
            self.phase = Phase::Finished;
            return Ok(());
        }

        let link = self
            .helper_link
            .take()
            .ok_or_else(|| DaemonError::bug("need_helper is set but no helper link exists"))?;

        helper::send_startup_success(&link)?;
        close_fd(link.fd_to_helper);
        close_fd(link.fd_from_helper);

        if !self.params.foreground {
            self.logger.close_stderr_out();
        }

        self.phase = Phase::Finished;
        Ok(())
    }

    /// Invokes the registered privileged action at `index`, either directly
    /// (no privdrop occurred) or by round-tripping through the helper.
    pub fn pcall(&self, index: usize) -> Result<(), DaemonError> {
        phase::require_after(self.phase, Phase::Forked, "pcall");
        phase::require_before(self.phase, Phase::Finished, "pcall");
        helper::invoke(
            self.helper_link.as_ref(),
            index,
            self.derived.will_privdrop,
            &self.actions,
        )
    }

    /// Queries whether an instance of this daemon is running, returning its
    /// pid, or `0` if not. Legal from `Phase::Init2` through `Phase::PidLocked`.
    /// Always `0` if no pid directory was given to `init2`.
    pub fn status(&self) -> Result<i32, DaemonError> {
        phase::require_after(self.phase, Phase::Init2, "status");
        phase::require_before(self.phase, Phase::Finished, "status");
        let Some(path) = self.active_pidfile_path() else {
            return Ok(0);
        };
        match pidfile::status(path)? {
            pidfile::Status::Running(pid) => Ok(pid),
            pidfile::Status::NotRunning => {
                if path.exists() {
                    self.logger.debug(&format!("stale pidfile at {}", path.display()));
                }
                Ok(0)
            }
        }
    }

    /// Terminates a running instance and waits (up to the termination budget)
    /// for it to exit. Returns `0` on success, the still-live pid on timeout.
    pub fn stop(&self) -> Result<i32, DaemonError> {
        let pid = self.status()?;
        if pid == 0 {
            self.logger.info("not running");
            return Ok(0);
        }

        match pidfile::terminate_and_wait(pid) {
            Ok(()) => {
                self.logger.info(&format!("stopped pid {pid}"));
                Ok(0)
            }
            Err(DaemonError::Transient(still_alive)) => {
                self.logger
                    .error(&format!("pid {still_alive} did not exit within the timeout"));
                Ok(still_alive)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends `sig` to a running instance. Returns `0` on success, `1` if no
    /// instance is running or the signal could not be delivered.
    pub fn signal(&self, sig: Signal) -> Result<i32, DaemonError> {
        let pid = self.status()?;
        if pid == 0 {
            self.logger.error("not running");
            return Ok(1);
        }

        match nix::sys::signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) => {
                self.logger.info(&format!("sent {sig} to pid {pid}"));
                Ok(0)
            }
            Err(e) => {
                self.logger.error(&format!("failed to signal pid {pid}: {e}"));
                Ok(1)
            }
        }
    }

    fn active_pidfile_path(&self) -> Option<&Path> {
        let paths = self.derived.paths.as_ref()?;
        Some(if self.phase < Phase::Secured { &paths.pre_chroot } else { &paths.post_chroot })
    }

    // -- accessors (4.11) --------------------------------------------------

    pub fn is_debug(&self) -> bool {
        self.params.debug
    }

    pub fn is_foreground(&self) -> bool {
        self.params.foreground
    }

    pub fn username(&self) -> Option<&str> {
        self.params.username.as_deref()
    }

    pub fn stderr_fd(&self) -> Option<RawFd> {
        self.logger.stderr_fd()
    }

    pub fn set_stderr_fd(&self, fd: RawFd) {
        self.logger.set_stderr_fd(fd);
    }

    pub fn close_stderr_out(&self) {
        self.logger.close_stderr_out();
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// The raw, intentionally-leaked pidfile lock descriptor, once acquired.
    pub fn pidfile_fd(&self) -> Option<RawFd> {
        self.pidfile_fd
    }

    /// Logs `err` at `fatal` (which terminates the process) and never
    /// returns. The library's own methods never call this themselves; a host
    /// wanting "any error is fatal" behavior calls it explicitly at each call
    /// site, e.g. `daemon.init2(..).unwrap_or_else(|e| daemon.fatal(&e))`.
    pub fn fatal(&self, err: &DaemonError) -> ! {
        self.logger.fatal(&err.to_string())
    }
}

fn new_pipe() -> Result<(RawFd, RawFd), DaemonError> {
    use std::os::fd::IntoRawFd;
    let (read, write) = nix::unistd::pipe().map_err(|e| DaemonError::system("pipe", e))?;
    Ok((read.into_raw_fd(), write.into_raw_fd()))
}

fn close_fd(fd: RawFd) {
    let _ = nix::unistd::close(fd);
}

fn ignore_signal(sig: Signal) -> Result<(), DaemonError> {
    unsafe { nix::sys::signal::signal(sig, nix::sys::signal::SigHandler::SigIgn) }
        .map_err(|e| DaemonError::system(format!("ignore {sig}"), e))?;
    Ok(())
}

fn redirect_standard_streams_to_null() -> Result<(), DaemonError> {
    use nix::fcntl::OFlag;
    use nix::sys::stat::Mode;
    use nix::unistd::dup2;

    let null_fd = nix::fcntl::open(std::path::Path::new("/dev/null"), OFlag::O_RDWR, Mode::empty())
        .map_err(|e| DaemonError::system("open(/dev/null)", e))?;

    for target in [0, 1, 2] {
        dup2(null_fd, target).map_err(|e| DaemonError::system("dup2 onto standard stream", e))?;
    }
    if null_fd > 2 {
        close_fd(null_fd);
    }
    Ok(())
}

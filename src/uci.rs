use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{mpsc, Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::{
    game::{ExtendedMove, Game},
    notation::parse_coordinate_notation,
    piece::Color,
    position::{FenError, Position},
    r#move::Move,
    score::{Score, ScoreBound},
};

/// Error types that can occur while driving a UCI engine.
#[derive(Error, Debug)]
pub enum UciError {
    /// The engine executable does not exist.
    #[error("Engine executable not found: {0}")]
    EngineNotFound(PathBuf),

    /// A command was issued in a state that does not allow it.
    #[error("The {command} command is not allowed in the {state} state")]
    BadState { command: &'static str, state: DriverState },

    /// The engine process exited while a command was outstanding.
    #[error("The engine process exited unexpectedly")]
    ProcessExited,

    /// A FEN string handed to the driver is invalid.
    #[error(transparent)]
    InvalidFen(#[from] FenError),

    /// A move handed to the driver is invalid in its position.
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// The requested ply does not exist in the game.
    #[error("No move for fullmove {fullmove} with {side} to move")]
    PlyNotFound { fullmove: u16, side: Color },

    /// Writing to or spawning the engine process failed.
    #[error("I/O error talking to the engine: {0}")]
    Io(#[from] std::io::Error),
}

/// The states of the driver's protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    /// No engine process is running.
    #[default]
    Off,

    /// The process is spawned and the `uci` handshake is in flight.
    Initializing,

    /// The engine accepted the handshake and is idle.
    Ready,

    /// A `go` command is active; the engine is searching.
    Thinking,
}

impl Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Off => write!(f, "Off"),
            DriverState::Initializing => write!(f, "Initializing"),
            DriverState::Ready => write!(f, "Ready"),
            DriverState::Thinking => write!(f, "Thinking"),
        }
    }
}

//======================================================================================================================
// Engine options
//======================================================================================================================

/// The typed payload of a UCI engine option, one variant per option type of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum UciOptionType {
    /// A boolean option with its default.
    Check { default: bool },

    /// A numeric option with default and allowed range.
    Spin { default: i64, min: i64, max: i64 },

    /// A selection from a predefined list of values.
    Combo { default: String, values: Vec<String> },

    /// A button that can be pressed but holds no value.
    Button,

    /// A free-form text option with its default.
    String { default: String },
}

/// An engine option as discovered during the `uci` handshake: a name and its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UciEngineOption {
    pub name: String,
    pub option_type: UciOptionType,
}

impl UciEngineOption {
    /// Parses an `option name … type …` line. Returns None when the line does not follow the option grammar.
    pub fn parse(line: &str) -> Option<UciEngineOption> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"option") || tokens.get(1) != Some(&"name") {
            return None;
        }

        let type_index = tokens.iter().position(|&token| token == "type")?;
        let name = tokens[2..type_index].join(" ");
        if name.is_empty() {
            return None;
        }

        let option_type = match *tokens.get(type_index + 1)? {
            "check" => {
                let default = keyword_value(&tokens, "default", type_index)? == "true";
                UciOptionType::Check { default }
            }
            "spin" => UciOptionType::Spin {
                default: keyword_value(&tokens, "default", type_index)?.parse().ok()?,
                min: keyword_value(&tokens, "min", type_index)?.parse().ok()?,
                max: keyword_value(&tokens, "max", type_index)?.parse().ok()?,
            },
            "combo" => {
                let mut default = String::new();
                let mut values = Vec::new();
                let mut current: Option<Vec<&str>> = None;
                let mut in_default = false;
                for &token in &tokens[type_index + 2..] {
                    match token {
                        "default" => {
                            in_default = true;
                            if let Some(words) = current.take() {
                                values.push(words.join(" "));
                            }
                        }
                        "var" => {
                            in_default = false;
                            if let Some(words) = current.take() {
                                values.push(words.join(" "));
                            }
                            current = Some(Vec::new());
                        }
                        word if in_default => {
                            if !default.is_empty() {
                                default.push(' ');
                            }
                            default.push_str(word);
                        }
                        word => {
                            if let Some(words) = current.as_mut() {
                                words.push(word);
                            }
                        }
                    }
                }
                if let Some(words) = current.take() {
                    values.push(words.join(" "));
                }
                UciOptionType::Combo { default, values }
            }
            "button" => UciOptionType::Button,
            "string" => {
                let default = match tokens[type_index + 2..].split_first() {
                    Some((&"default", rest)) => rest.join(" "),
                    _ => String::new(),
                };
                let default = if default == "<empty>" { String::new() } else { default };
                UciOptionType::String { default }
            }
            _ => return None,
        };

        Some(UciEngineOption { name, option_type })
    }
}

/// Returns the token that follows a keyword located after the `type` token.
fn keyword_value<'a>(tokens: &[&'a str], keyword: &str, type_index: usize) -> Option<&'a str> {
    let position = tokens[type_index..].iter().position(|&token| token == keyword)?;
    tokens.get(type_index + position + 1).copied()
}

//======================================================================================================================
// Engine info
//======================================================================================================================

/// A typed snapshot of one `info …` line from the engine.
///
/// Lines are partial; `update` only overwrites the fields present on the line, so a snapshot accumulates the latest
/// known value of every field for its multipv slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UciEngineInfo {
    /// Search depth in plies.
    pub depth: Option<u16>,

    /// Selective search depth.
    pub seldepth: Option<u16>,

    /// Time searched so far.
    pub time: Option<Duration>,

    /// Nodes searched so far.
    pub nodes: Option<u64>,

    /// Search speed in nodes per second.
    pub nps: Option<u64>,

    /// Endgame tablebase hits.
    pub tbhits: Option<u64>,

    /// The zero-based multipv slot this snapshot belongs to. `multipv k` on the wire maps to slot `k - 1`.
    pub multipv: usize,

    /// The move the engine is currently examining.
    pub current_move: Option<String>,

    /// One-based index of the current move in the root move list.
    pub current_move_number: Option<u32>,

    /// The evaluation, in centipawns or as a mate distance, from the engine's side to move.
    pub evaluation: Option<Score>,

    /// Whether the evaluation is exact or a bound.
    pub bound: ScoreBound,

    /// The first move of the principal variation.
    pub pv_first: Option<String>,

    /// The remainder of the principal variation, as raw text.
    pub pv_rest: String,
}

impl UciEngineInfo {
    /// Updates the snapshot from one `info` line.
    ///
    /// # Returns
    /// `true` when the line carried a `score` token, which is the driver's cue to raise the info-changed observation.
    pub fn update(&mut self, line: &str) -> bool {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut had_score = false;

        let mut index = 1;
        while index < tokens.len() {
            match tokens[index] {
                "depth" => {
                    self.depth = tokens.get(index + 1).and_then(|value| value.parse().ok());
                    index += 2;
                }
                "seldepth" => {
                    self.seldepth = tokens.get(index + 1).and_then(|value| value.parse().ok());
                    index += 2;
                }
                "time" => {
                    self.time =
                        tokens.get(index + 1).and_then(|value| value.parse().ok()).map(Duration::from_millis);
                    index += 2;
                }
                "nodes" => {
                    self.nodes = tokens.get(index + 1).and_then(|value| value.parse().ok());
                    index += 2;
                }
                "nps" => {
                    self.nps = tokens.get(index + 1).and_then(|value| value.parse().ok());
                    index += 2;
                }
                "tbhits" => {
                    self.tbhits = tokens.get(index + 1).and_then(|value| value.parse().ok());
                    index += 2;
                }
                "multipv" => {
                    self.multipv = tokens
                        .get(index + 1)
                        .and_then(|value| value.parse::<usize>().ok())
                        .map_or(0, |value| value.saturating_sub(1));
                    index += 2;
                }
                "currmove" => {
                    self.current_move = tokens.get(index + 1).map(|value| value.to_string());
                    index += 2;
                }
                "currmovenumber" => {
                    self.current_move_number = tokens.get(index + 1).and_then(|value| value.parse().ok());
                    index += 2;
                }
                "score" => {
                    had_score = true;
                    self.bound = ScoreBound::Exact;
                    match tokens.get(index + 1) {
                        Some(&"cp") => {
                            self.evaluation =
                                tokens.get(index + 2).and_then(|value| value.parse().ok()).map(Score::Centipawns);
                            index += 3;
                        }
                        Some(&"mate") => {
                            self.evaluation =
                                tokens.get(index + 2).and_then(|value| value.parse().ok()).map(Score::Mate);
                            index += 3;
                        }
                        _ => index += 1,
                    }
                    while let Some(&bound) = tokens.get(index) {
                        match bound {
                            "lowerbound" => self.bound = ScoreBound::Lower,
                            "upperbound" => self.bound = ScoreBound::Upper,
                            _ => break,
                        }
                        index += 1;
                    }
                }
                "pv" => {
                    self.pv_first = tokens.get(index + 1).map(|value| value.to_string());
                    self.pv_rest = tokens.get(index + 2..).map_or(String::new(), |rest| rest.join(" "));
                    index = tokens.len();
                }
                _ => index += 1,
            }
        }

        had_score
    }
}

/// Returns the zero-based multipv slot an info line addresses. Lines without a `multipv` token address slot 0.
fn multipv_slot(line: &str) -> usize {
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "multipv" {
            return tokens.next().and_then(|value| value.parse::<usize>().ok()).map_or(0, |k| k.saturating_sub(1));
        }
    }
    0
}

//======================================================================================================================
// Analysis limits
//======================================================================================================================

/// The termination shape of an analysis: unbounded, by depth, or by wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    Infinite,
    Depth(u16),
    MoveTime(Duration),
}

/// Builds the `go` command for a limit, optionally restricted to a set of root moves.
fn go_command(limit: SearchLimit, search_moves: Option<&[Move]>) -> String {
    let mut command = match limit {
        SearchLimit::Infinite => "go infinite".to_string(),
        SearchLimit::Depth(depth) => format!("go depth {}", depth),
        SearchLimit::MoveTime(duration) => format!("go movetime {}", duration.as_millis()),
    };
    if let Some(moves) = search_moves {
        if !moves.is_empty() {
            command.push_str(" searchmoves");
            for mv in moves {
                command.push(' ');
                command.push_str(&mv.to_uci_string());
            }
        }
    }
    command
}

//======================================================================================================================
// Driver
//======================================================================================================================

/// Observer for every raw line the engine emits.
pub type OutputObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer for analysis info snapshots that carried a score.
pub type InfoObserver = Arc<dyn Fn(&UciEngineInfo) + Send + Sync>;

/// Which engine reply fulfils the outstanding command completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    UciOk,
    ReadyOk,
    BestMove,
}

/// A one-shot completion: created when an awaitable command is sent, fulfilled by the matching reply.
struct Pending {
    kind: PendingKind,
    tx: mpsc::Sender<Result<(), UciError>>,
}

/// The state shared between the caller and the reader thread.
#[derive(Default)]
struct DriverShared {
    state: DriverState,
    name: Option<String>,
    author: Option<String>,
    options: BTreeMap<String, UciEngineOption>,
    infos: Vec<UciEngineInfo>,
    position: Position,
    best_move: Option<ExtendedMove>,
    ponder_move: Option<Move>,
    pending: Option<Pending>,
    output_observer: Option<OutputObserver>,
    info_observer: Option<InfoObserver>,
}

/// A driver for an external UCI chess engine.
///
/// The driver owns the engine child process and its stdin; a reader thread consumes stdout line by line, maintains the
/// shared state and fulfils command completions. One command may be outstanding at a time; callers are expected to be
/// a single logical thread.
pub struct UciDriver {
    path: PathBuf,
    arguments: Vec<String>,
    working_dir: Option<PathBuf>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    shared: Arc<Mutex<DriverShared>>,
    reader_handle: Option<thread::JoinHandle<()>>,
    analysis_rx: Option<mpsc::Receiver<Result<(), UciError>>>,
}

impl UciDriver {
    /// Creates a driver for the engine binary at the given path. The process is not spawned until `start_engine`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_arguments(path, Vec::new(), None)
    }

    /// Creates a driver with process arguments and an optional working directory.
    pub fn with_arguments(path: impl Into<PathBuf>, arguments: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            arguments,
            working_dir,
            child: None,
            stdin: None,
            shared: Arc::new(Mutex::new(DriverShared::default())),
            reader_handle: None,
            analysis_rx: None,
        }
    }

    fn shared(&self) -> MutexGuard<'_, DriverShared> {
        self.shared.lock().expect("The driver state lock should not be poisoned")
    }

    /// Returns the current state of the protocol state machine.
    pub fn state(&self) -> DriverState {
        self.shared().state
    }

    /// Returns the engine name reported during the handshake.
    pub fn engine_name(&self) -> Option<String> {
        self.shared().name.clone()
    }

    /// Returns the engine author reported during the handshake.
    pub fn engine_author(&self) -> Option<String> {
        self.shared().author.clone()
    }

    /// Returns the options the engine advertised, keyed by name.
    pub fn options(&self) -> BTreeMap<String, UciEngineOption> {
        self.shared().options.clone()
    }

    /// Returns the info snapshot of a multipv slot. Slot 0 is the principal line.
    pub fn analysis_info(&self, slot: usize) -> Option<UciEngineInfo> {
        self.shared().infos.get(slot).cloned()
    }

    /// Returns the best move of the last completed analysis, stamped with the think time, depth and evaluation of the
    /// final info snapshot.
    pub fn best_move(&self) -> Option<ExtendedMove> {
        self.shared().best_move.clone()
    }

    /// Returns the move the engine suggested pondering on, if any.
    pub fn ponder_move(&self) -> Option<Move> {
        self.shared().ponder_move
    }

    /// Installs the observer called with every raw line the engine emits.
    pub fn set_output_observer(&self, observer: OutputObserver) {
        self.shared().output_observer = Some(observer);
    }

    /// Installs the observer called with an info snapshot whenever an info line carries a score. Observers are called
    /// from the reader thread and must not call back into the driver.
    pub fn set_info_observer(&self, observer: InfoObserver) {
        self.shared().info_observer = Some(observer);
    }

    fn ensure_state(&self, expected: DriverState, command: &'static str) -> Result<(), UciError> {
        let state = self.state();
        if state != expected {
            return Err(UciError::BadState { command, state });
        }
        Ok(())
    }

    //==================================================================================================================
    // Commands
    //==================================================================================================================

    /// Spawns the engine process and performs the `uci` handshake, returning once `uciok` arrived.
    ///
    /// During the handshake the engine's identification and option list are collected.
    pub fn start_engine(&mut self) -> Result<(), UciError> {
        self.ensure_state(DriverState::Off, "start_engine")?;

        if !self.path.exists() {
            return Err(UciError::EngineNotFound(self.path.clone()));
        }

        let mut command = Command::new(&self.path);
        command.args(&self.arguments).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());
        if let Some(working_dir) = &self.working_dir {
            command.current_dir(working_dir);
        }

        let mut child = command.spawn().map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => UciError::EngineNotFound(self.path.clone()),
            _ => UciError::Io(error),
        })?;

        self.stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("The child stdout is piped");
        self.child = Some(child);

        {
            let mut guard = self.shared();
            let output_observer = guard.output_observer.take();
            let info_observer = guard.info_observer.take();
            *guard = DriverShared {
                state: DriverState::Initializing,
                infos: vec![UciEngineInfo::default()],
                output_observer,
                info_observer,
                ..DriverShared::default()
            };
        }

        let shared = Arc::clone(&self.shared);
        self.reader_handle = Some(thread::spawn(move || reader_loop(stdout, shared)));

        self.send_and_wait("uci", PendingKind::UciOk)
    }

    /// Applies a set of option values and synchronises with `isready`/`readyok`.
    ///
    /// Parameters whose name the engine did not advertise are dropped with a diagnostic. A `MultiPV` parameter also
    /// resizes the per-multipv info array.
    pub fn set_options(&mut self, parameters: &[(String, String)]) -> Result<(), UciError> {
        self.ensure_state(DriverState::Ready, "set_options")?;

        for (name, value) in parameters {
            let known = {
                let guard = self.shared();
                guard.options.get(name).cloned()
            };
            let Some(option) = known else {
                log::debug!("dropping unknown engine option: {}", name);
                continue;
            };

            match option.option_type {
                UciOptionType::Button => self.send(&format!("setoption name {}", name))?,
                _ => self.send(&format!("setoption name {} value {}", name, value))?,
            }

            if name == "MultiPV" {
                if let Ok(count) = value.parse::<usize>() {
                    let mut guard = self.shared();
                    guard.infos.resize(count.max(1), UciEngineInfo::default());
                }
            }
        }

        self.send_and_wait("isready", PendingKind::ReadyOk)
    }

    /// Announces a new game to the engine and synchronises with `isready`/`readyok`.
    pub fn new_game(&mut self) -> Result<(), UciError> {
        self.ensure_state(DriverState::Ready, "new_game")?;
        self.send("ucinewgame")?;
        self.send_and_wait("isready", PendingKind::ReadyOk)
    }

    /// The composite preparation step: start the engine, apply options, announce a new game.
    pub fn prepare(&mut self, parameters: &[(String, String)]) -> Result<(), UciError> {
        self.start_engine()?;
        self.set_options(parameters)?;
        self.new_game()
    }

    /// Sets the position the engine will analyse, as a FEN plus an optional move sequence in coordinate notation.
    ///
    /// A driver that is `Thinking` is stopped first. The driver validates the FEN and every move so the best-move
    /// reply can later be interpreted against the final position.
    pub fn set_position(&mut self, fen: &str, moves: &[String]) -> Result<(), UciError> {
        if self.state() == DriverState::Thinking {
            self.stop_thinking()?;
        }
        self.ensure_state(DriverState::Ready, "set_position")?;

        let mut position = Position::new_from_fen(fen)?;
        for move_text in moves {
            let mv = parse_coordinate_notation(&position, move_text)
                .map_err(|_| UciError::InvalidMove(move_text.clone()))?;
            position.make(mv);
        }

        let mut command = format!("position fen {}", fen);
        if !moves.is_empty() {
            command.push_str(" moves ");
            command.push_str(&moves.join(" "));
        }
        self.send(&command)?;

        self.shared().position = position;
        Ok(())
    }

    /// Sets the position reached in a game after the move played by `side` on fullmove `fullmove`.
    pub fn set_position_from_game(&mut self, game: &Game, fullmove: u16, side: Color) -> Result<(), UciError> {
        let index = game.ply_index(fullmove, side).ok_or(UciError::PlyNotFound { fullmove, side })?;
        let moves = game.uci_moves(index + 1);
        self.set_position(game.start_fen(), &moves)
    }

    /// Starts an analysis of the current position and enters `Thinking`.
    ///
    /// An infinite analysis runs until `stop_thinking`. Depth- and time-bounded analyses complete on their own; use
    /// `wait_for_analysis` to block until the engine's `bestmove` arrives.
    pub fn start_analysis(&mut self, limit: SearchLimit, search_moves: Option<&[Move]>) -> Result<(), UciError> {
        self.ensure_state(DriverState::Ready, "start_analysis")?;

        {
            let mut guard = self.shared();
            let slots = guard.infos.len().max(1);
            guard.infos = vec![UciEngineInfo::default(); slots];
            guard.best_move = None;
            guard.ponder_move = None;
            guard.state = DriverState::Thinking;
        }

        self.analysis_rx = None;
        if limit != SearchLimit::Infinite {
            let (tx, rx) = mpsc::channel();
            self.shared().pending = Some(Pending { kind: PendingKind::BestMove, tx });
            self.analysis_rx = Some(rx);
        }

        if let Err(error) = self.send(&go_command(limit, search_moves)) {
            {
                let mut guard = self.shared();
                guard.state = DriverState::Ready;
                guard.pending = None;
            }
            self.analysis_rx = None;
            return Err(error);
        }
        Ok(())
    }

    /// Blocks until the running depth- or time-bounded analysis completes with a `bestmove`.
    pub fn wait_for_analysis(&mut self) -> Result<(), UciError> {
        let Some(rx) = self.analysis_rx.take() else {
            return Err(UciError::BadState { command: "wait_for_analysis", state: self.state() });
        };
        rx.recv().unwrap_or(Err(UciError::ProcessExited))
    }

    /// Stops a running analysis and blocks until the engine answers with its `bestmove`.
    ///
    /// An engine that found a forced line may answer `bestmove` on its own before the stop arrives; that case is not
    /// an error, the captured best move stands.
    pub fn stop_thinking(&mut self) -> Result<(), UciError> {
        let mut new_rx = None;
        {
            let mut guard = self.shared();
            match guard.state {
                DriverState::Thinking => {}
                DriverState::Ready if guard.best_move.is_some() => return Ok(()),
                state => return Err(UciError::BadState { command: "stop_thinking", state }),
            }
            if self.analysis_rx.is_none() {
                let (tx, rx) = mpsc::channel();
                guard.pending = Some(Pending { kind: PendingKind::BestMove, tx });
                new_rx = Some(rx);
            }
        }
        if let Some(rx) = new_rx {
            self.analysis_rx = Some(rx);
        }

        self.send("stop")?;
        self.wait_for_analysis()
    }

    /// Shuts the engine down: `quit` is sent, the process gets one second to exit and is killed afterwards. Any
    /// outstanding completion fails with `ProcessExited`.
    pub fn dispose(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = self.send("quit");

            let deadline = Instant::now() + Duration::from_secs(1);
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                    _ => {
                        log::warn!("engine did not exit after quit, killing the process");
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }
        }

        self.stdin = None;
        self.analysis_rx = None;
        {
            let mut guard = self.shared();
            guard.state = DriverState::Off;
            if let Some(pending) = guard.pending.take() {
                let _ = pending.tx.send(Err(UciError::ProcessExited));
            }
        }
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
    }

    //==================================================================================================================
    // Wire helpers
    //==================================================================================================================

    /// Writes one command line to the engine. Every sent line is logged.
    fn send(&mut self, command: &str) -> Result<(), UciError> {
        log::debug!("engine <- {}", command);
        let stdin = self.stdin.as_mut().ok_or(UciError::ProcessExited)?;
        writeln!(stdin, "{}", command)?;
        stdin.flush()?;
        Ok(())
    }

    /// Sends a command and blocks until the reply that fulfils it arrives.
    fn send_and_wait(&mut self, command: &str, kind: PendingKind) -> Result<(), UciError> {
        let (tx, rx) = mpsc::channel();
        self.shared().pending = Some(Pending { kind, tx });

        if let Err(error) = self.send(command) {
            self.shared().pending = None;
            return Err(error);
        }

        rx.recv().unwrap_or(Err(UciError::ProcessExited))
    }
}

impl Drop for UciDriver {
    fn drop(&mut self) {
        self.dispose();
    }
}

//======================================================================================================================
// Reader thread
//======================================================================================================================

/// Consumes engine stdout line by line until the process exits. On exit the state machine drops to `Off` and any
/// outstanding completion fails, so no caller stays blocked on a reply that can no longer arrive.
fn reader_loop(stdout: ChildStdout, shared: Arc<Mutex<DriverShared>>) {
    let reader = BufReader::new(stdout);

    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim_end().to_string();
        log::trace!("engine -> {}", line);

        let output_observer = {
            let guard = shared.lock().expect("The driver state lock should not be poisoned");
            guard.output_observer.clone()
        };
        if let Some(observer) = output_observer {
            observer(&line);
        }

        handle_line(&line, &shared);
    }

    let mut guard = shared.lock().expect("The driver state lock should not be poisoned");
    guard.state = DriverState::Off;
    if let Some(pending) = guard.pending.take() {
        let _ = pending.tx.send(Err(UciError::ProcessExited));
    }
}

/// Fulfils the outstanding completion when its kind matches the received reply.
fn complete(guard: &mut DriverShared, kind: PendingKind) {
    if guard.pending.as_ref().is_some_and(|pending| pending.kind == kind) {
        let pending = guard.pending.take().expect("The pending completion was just checked");
        let _ = pending.tx.send(Ok(()));
    }
}

/// Dispatches one engine line to the state machine.
fn handle_line(line: &str, shared: &Arc<Mutex<DriverShared>>) {
    let mut tokens = line.split_whitespace();
    let Some(first) = tokens.next() else { return };

    match first {
        "id" => {
            let mut guard = shared.lock().expect("The driver state lock should not be poisoned");
            let rest: Vec<&str> = tokens.collect();
            match rest.split_first() {
                Some((&"name", value)) => guard.name = Some(value.join(" ")),
                Some((&"author", value)) => guard.author = Some(value.join(" ")),
                _ => log::debug!("unparsable id line: {}", line),
            }
        }
        "option" => {
            let mut guard = shared.lock().expect("The driver state lock should not be poisoned");
            match UciEngineOption::parse(line) {
                Some(option) => {
                    guard.options.insert(option.name.clone(), option);
                }
                None => log::debug!("unparsable option line: {}", line),
            }
        }
        "uciok" => {
            let mut guard = shared.lock().expect("The driver state lock should not be poisoned");
            guard.state = DriverState::Ready;
            complete(&mut guard, PendingKind::UciOk);
        }
        "readyok" => {
            let mut guard = shared.lock().expect("The driver state lock should not be poisoned");
            complete(&mut guard, PendingKind::ReadyOk);
        }
        "info" => {
            // `info string` lines carry free-form text, not analysis data; they are only forwarded raw.
            if line.starts_with("info string") {
                return;
            }

            let (observer, snapshot) = {
                let mut guard = shared.lock().expect("The driver state lock should not be poisoned");
                let slot = multipv_slot(line);
                if guard.infos.len() <= slot {
                    guard.infos.resize(slot + 1, UciEngineInfo::default());
                }
                let had_score = guard.infos[slot].update(line);
                if had_score {
                    (guard.info_observer.clone(), Some(guard.infos[slot].clone()))
                } else {
                    (None, None)
                }
            };
            if let (Some(observer), Some(snapshot)) = (observer, snapshot) {
                observer(&snapshot);
            }
        }
        "bestmove" => {
            let mut guard = shared.lock().expect("The driver state lock should not be poisoned");
            let rest: Vec<&str> = tokens.collect();

            let side = guard.position.side_to_move();
            let mv = match rest.first() {
                Some(&"(none)") | None => Move::NULL,
                Some(move_text) => match parse_coordinate_notation(&guard.position, move_text) {
                    Ok(mv) => mv,
                    Err(error) => {
                        log::debug!("unparsable bestmove line: {} ({})", line, error);
                        Move::NULL
                    }
                },
            };

            let mut best = ExtendedMove::new(mv);
            best.side = side;
            if let Some(info) = guard.infos.first() {
                best.annotations.used_time = info.time;
                best.annotations.depth = info.depth;
                best.annotations.evaluation = info.evaluation;
            }
            guard.best_move = Some(best);

            guard.ponder_move = match rest.as_slice() {
                [_, "ponder", ponder_text] => {
                    let mut after = guard.position.clone();
                    if mv != Move::NULL {
                        after.make(mv);
                    }
                    parse_coordinate_notation(&after, ponder_text).ok()
                }
                _ => None,
            };

            guard.state = DriverState::Ready;
            complete(&mut guard, PendingKind::BestMove);
        }
        _ => {
            // An unknown prefix is a protocol error; it was already forwarded through the raw-output observation and
            // the driver keeps running.
            log::debug!("unparsable engine line: {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod option_tests {
        use super::*;

        #[test]
        fn test_parse_spin_option() {
            let option = UciEngineOption::parse("option name MultiPV type spin default 1 min 1 max 500").unwrap();
            assert_eq!(option.name, "MultiPV");
            assert_eq!(option.option_type, UciOptionType::Spin { default: 1, min: 1, max: 500 });
        }

        #[test]
        fn test_parse_check_option() {
            let option = UciEngineOption::parse("option name Ponder type check default false").unwrap();
            assert_eq!(option.option_type, UciOptionType::Check { default: false });
        }

        #[test]
        fn test_parse_multi_word_name() {
            let option =
                UciEngineOption::parse("option name Clear Hash type button").expect("The option should parse");
            assert_eq!(option.name, "Clear Hash");
            assert_eq!(option.option_type, UciOptionType::Button);
        }

        #[test]
        fn test_parse_string_option() {
            let option =
                UciEngineOption::parse("option name SyzygyPath type string default <empty>").unwrap();
            assert_eq!(option.option_type, UciOptionType::String { default: String::new() });
        }

        #[test]
        fn test_parse_combo_option() {
            let option = UciEngineOption::parse(
                "option name Analysis Contempt type combo default Both var Off var White var Black var Both",
            )
            .unwrap();
            assert_eq!(option.name, "Analysis Contempt");
            assert_eq!(
                option.option_type,
                UciOptionType::Combo {
                    default: "Both".to_string(),
                    values: vec!["Off".to_string(), "White".to_string(), "Black".to_string(), "Both".to_string()],
                }
            );
        }

        #[test]
        fn test_parse_rejects_malformed_lines() {
            assert!(UciEngineOption::parse("option MultiPV spin").is_none());
            assert!(UciEngineOption::parse("info depth 10").is_none());
            assert!(UciEngineOption::parse("option name X type banana").is_none());
        }
    }

    mod info_tests {
        use super::*;

        #[test]
        fn test_update_full_line() {
            let mut info = UciEngineInfo::default();
            let had_score = info.update(
                "info depth 24 seldepth 31 multipv 1 score cp 35 nodes 1500000 nps 1200000 tbhits 0 time 1250 pv e2e4 e7e5 g1f3",
            );
            assert!(had_score);
            assert_eq!(info.depth, Some(24));
            assert_eq!(info.seldepth, Some(31));
            assert_eq!(info.multipv, 0);
            assert_eq!(info.evaluation, Some(Score::Centipawns(35)));
            assert_eq!(info.bound, ScoreBound::Exact);
            assert_eq!(info.nodes, Some(1_500_000));
            assert_eq!(info.nps, Some(1_200_000));
            assert_eq!(info.time, Some(Duration::from_millis(1250)));
            assert_eq!(info.pv_first.as_deref(), Some("e2e4"));
            assert_eq!(info.pv_rest, "e7e5 g1f3");
        }

        #[test]
        fn test_update_without_score() {
            let mut info = UciEngineInfo::default();
            let had_score = info.update("info depth 8 currmove b1c3 currmovenumber 3");
            assert!(!had_score);
            assert_eq!(info.depth, Some(8));
            assert_eq!(info.current_move.as_deref(), Some("b1c3"));
            assert_eq!(info.current_move_number, Some(3));
        }

        #[test]
        fn test_update_mate_score_and_bounds() {
            let mut info = UciEngineInfo::default();
            assert!(info.update("info depth 12 score mate -3 pv e8d8"));
            assert_eq!(info.evaluation, Some(Score::Mate(-3)));

            assert!(info.update("info depth 13 score cp 50 lowerbound nodes 42"));
            assert_eq!(info.evaluation, Some(Score::Centipawns(50)));
            assert_eq!(info.bound, ScoreBound::Lower);
            assert_eq!(info.nodes, Some(42));
        }

        #[test]
        fn test_update_accumulates_fields() {
            let mut info = UciEngineInfo::default();
            info.update("info depth 10 score cp 20 pv d2d4");
            info.update("info depth 11 nodes 99");
            assert_eq!(info.depth, Some(11));
            assert_eq!(info.evaluation, Some(Score::Centipawns(20)));
            assert_eq!(info.pv_first.as_deref(), Some("d2d4"));
        }

        #[test]
        fn test_multipv_slot_routing() {
            assert_eq!(multipv_slot("info depth 10 multipv 1 score cp 3"), 0);
            assert_eq!(multipv_slot("info depth 10 multipv 3 score cp -8"), 2);
            assert_eq!(multipv_slot("info depth 10 score cp 3"), 0);
        }
    }

    mod command_tests {
        use super::*;

        #[test]
        fn test_go_command_shapes() {
            assert_eq!(go_command(SearchLimit::Infinite, None), "go infinite");
            assert_eq!(go_command(SearchLimit::Depth(20), None), "go depth 20");
            assert_eq!(go_command(SearchLimit::MoveTime(Duration::from_millis(10_000)), None), "go movetime 10000");

            let moves = [Move::new(crate::coordinates::Square::E2, crate::coordinates::Square::E4, crate::piece::Piece::WHITE_PAWN)];
            assert_eq!(
                go_command(SearchLimit::Infinite, Some(&moves)),
                "go infinite searchmoves e2e4"
            );
        }

        #[test]
        fn test_commands_require_a_running_engine() {
            let mut driver = UciDriver::new("/definitely/not/a/real/engine");
            assert_eq!(driver.state(), DriverState::Off);

            assert!(matches!(driver.start_engine(), Err(UciError::EngineNotFound(_))));
            assert!(matches!(driver.new_game(), Err(UciError::BadState { .. })));
            assert!(matches!(driver.start_analysis(SearchLimit::Infinite, None), Err(UciError::BadState { .. })));
            assert!(matches!(driver.stop_thinking(), Err(UciError::BadState { .. })));
        }
    }
}

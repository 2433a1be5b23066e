mod engine;
mod process;
mod runtime;

pub use engine::{LoopbackSpeech, LoopbackTranslator, SAMPLE_RATE};
pub use process::{ExitHook, WorkerCommand, WorkerError, WorkerHandle};
pub use runtime::{protocol_output, run, Engine, RunOutcome};

use std::io;
use std::process::ExitCode;

use log::error;

use crate::models::ModelFamily;

/// Entry point of `local-translate worker --family <family>`.
pub fn run_builtin(family: ModelFamily) -> ExitCode {
    let output = match protocol_output() {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to detach protocol stream: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let input = io::stdin().lock();

    let outcome = match family {
        ModelFamily::Translation => run(LoopbackTranslator::default(), input, output),
        ModelFamily::Tts => run(LoopbackSpeech::default(), input, output),
    };

    match outcome {
        RunOutcome::Fatal => ExitCode::FAILURE,
        RunOutcome::Quit | RunOutcome::EndOfInput => ExitCode::SUCCESS,
    }
}

//! Implementation of `quern serve`.

use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use quern_match::Database;

use crate::cli::args::ServeCommand;
use crate::cli::corpus;

/// Serves a corpus to remote matchers until interrupted.
pub fn run(cmd: &ServeCommand) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db = match corpus::load(&cmd.corpus) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(&cmd.listen) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: cannot listen on {}: {err}", cmd.listen);
            return ExitCode::FAILURE;
        }
    };
    println!("serving {} documents on {}", db.doccount(), cmd.listen);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    quern_remote::serve(db, Box::new(stream));
                });
            }
            Err(err) => {
                eprintln!("error: accept failed: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

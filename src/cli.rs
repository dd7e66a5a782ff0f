use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Configuration;
use crate::exec::Supervisor;
use crate::observability::StatusReporter;
use crate::runner::{TestRunner, TestRunnerOptions, TestSelection};
use crate::sanity::{SanityOptions, SanityWorkflow};
use crate::store::{MetadataStore, Tracker};
use crate::types::HarnessError;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Install root holding lib/ and tools/
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Stream supervised process output to the terminal
    #[arg(short, long)]
    verbose: bool,
    /// Suppress status lines
    #[arg(long)]
    no_status: bool,
    /// Append status and captured output to this file
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    /// Operate on excluded challenges too
    #[arg(long)]
    excl: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests against a checked-out challenge working copy
    Test {
        /// Working copy created by a checkout
        #[arg(short = 'w', long)]
        working_dir: PathBuf,
        /// Explicit test ids (caller order preserved)
        #[arg(short = 't', long, num_args = 1.., conflicts_with_all = ["pos_tests", "neg_tests"])]
        tests: Vec<String>,
        /// Run all positive tests
        #[arg(long, conflicts_with = "neg_tests")]
        pos_tests: bool,
        /// Run all negative tests
        #[arg(long)]
        neg_tests: bool,
        /// Test ids are flat numeric indices (positives first)
        #[arg(long)]
        only_numbers: bool,
        /// Per-test timeout in seconds
        #[arg(short = 'T', long)]
        timeout: Option<u64>,
        /// Invert the reported result of negative tests
        #[arg(long)]
        neg_pov: bool,
        /// Exit with an error at the first disqualifying result
        #[arg(long)]
        exit_fail: bool,
        /// Persist outcomes into the metadata document
        #[arg(long)]
        update: bool,
        /// File receiving per-test result lines
        #[arg(long)]
        out_file: Option<PathBuf>,
        /// Also write failed entries to the out file
        #[arg(long)]
        write_fail: bool,
        /// Print passing test ids
        #[arg(long, conflicts_with = "print_class")]
        print_ids: bool,
        /// Print PASS/FAIL per test
        #[arg(long)]
        print_class: bool,
        /// TCP port handed to the test driver
        #[arg(long)]
        port: Option<String>,
    },
    /// Sanity checks for challenges
    Sanity {
        /// Challenge names; all non-excluded challenges when omitted
        challenges: Vec<String>,
        /// Per-test timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Number of polls to generate
        #[arg(long, default_value_t = 10)]
        count: u32,
        /// Enable the poll-generation stage
        #[arg(long)]
        genpolls: bool,
        /// Bounded retry rounds hunting for a passing generation seed
        #[arg(long)]
        lookup: Option<u32>,
        /// Keep the generated working copy
        #[arg(long)]
        keep: bool,
        /// Test only POVs
        #[arg(long)]
        povs: bool,
        /// Build instrumented and capture coverage diagnostics
        #[arg(long)]
        coverage: bool,
        /// Suppress generator assertion errors
        #[arg(long)]
        suppress_assertion: bool,
        /// Stop testing at the first failure
        #[arg(long)]
        strict: bool,
        /// Exclude failing challenges and persist results
        #[arg(long)]
        persistent: bool,
    },
    /// Materialize a challenge working copy
    Checkout {
        /// Challenge name
        challenge: String,
        /// Destination working directory
        #[arg(short = 'w', long)]
        working_dir: PathBuf,
    },
    /// Compile a checked-out working copy
    Compile {
        /// Working copy created by a checkout
        #[arg(short = 'w', long)]
        working_dir: PathBuf,
        /// Build instrumented for coverage
        #[arg(long)]
        coverage: bool,
        /// Instrumentation files handed to the build script
        #[arg(long, num_args = 0..)]
        inst_files: Vec<PathBuf>,
        /// Fix files handed to the build script
        #[arg(long, num_args = 0..)]
        fix_files: Vec<PathBuf>,
        /// Exit the harness with the build tool's code on failure
        #[arg(long)]
        exit_err: bool,
    },
    /// Generate polls for a challenge
    Genpolls {
        /// Challenge name
        challenge: String,
        /// Number of polls to generate
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
    /// Read-only metadata queries
    Info {
        /// Challenge name; lists challenge names when omitted
        challenge: Option<String>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cfg = Configuration::new(&cli.root);
    cfg.validate()?;

    let mut status = StatusReporter::new(cli.verbose, cli.no_status);
    status.set_log_file(cli.log_file.clone());

    let mut store = MetadataStore::open(&cfg.metadata)?;

    match cli.command {
        Commands::Test {
            working_dir,
            tests,
            pos_tests,
            neg_tests,
            only_numbers,
            timeout,
            neg_pov,
            exit_fail,
            update,
            out_file,
            write_fail,
            print_ids,
            print_class,
            port,
        } => {
            let name = Tracker::open(&working_dir)?.name().to_string();
            store.has_challenge(&name)?;
            if store.is_excluded(&name) && !cli.excl {
                status.warn(&format!("Challenge {name} was excluded."));
                return Err(HarnessError::ExcludedChallenge(name).into());
            }

            let selection = if !tests.is_empty() {
                TestSelection::Explicit(tests)
            } else if pos_tests {
                TestSelection::Positive
            } else if neg_tests {
                TestSelection::Negative
            } else {
                TestSelection::All
            };

            let opts = TestRunnerOptions {
                selection,
                only_numbers,
                neg_pov,
                exit_fail,
                update,
                timeout,
                port,
                out_file,
                write_fail,
                print_ids,
                print_class,
            };
            let mut runner = TestRunner::new(&cfg, &mut store, &working_dir, opts, status)?;
            runner.run(false)?;
            Ok(())
        }
        Commands::Sanity {
            challenges,
            timeout,
            count,
            genpolls,
            lookup,
            keep,
            povs,
            coverage,
            suppress_assertion,
            strict,
            persistent,
        } => {
            for name in &challenges {
                store.has_challenge(name)?;
                if store.is_excluded(name) && !cli.excl {
                    status.warn(&format!("Challenge {name} was excluded."));
                    return Err(HarnessError::ExcludedChallenge(name.clone()).into());
                }
            }

            let opts = SanityOptions {
                timeout,
                genpolls,
                persistent,
                suppress_assertion,
                count,
                keep,
                strict,
                lookup,
                povs,
                coverage,
            };
            let mut workflow = SanityWorkflow::new(&cfg, &mut store, opts, status);
            workflow.run(challenges)?;
            Ok(())
        }
        Commands::Checkout {
            challenge,
            working_dir,
        } => {
            store.has_challenge(&challenge)?;
            if store.is_excluded(&challenge) && !cli.excl {
                status.warn(&format!("Challenge {challenge} was excluded."));
                return Err(HarnessError::ExcludedChallenge(challenge).into());
            }
            std::fs::create_dir_all(&working_dir)?;
            let out = crate::ops::checkout::run(&cfg, &challenge, &working_dir);
            match out.error {
                Some(err) => {
                    status.fail(&err);
                    Err(HarnessError::Process(err).into())
                }
                None => {
                    status.ok(&out.output);
                    Ok(())
                }
            }
        }
        Commands::Compile {
            working_dir,
            coverage,
            inst_files,
            fix_files,
            exit_err,
        } => {
            let name = Tracker::open(&working_dir)?.name().to_string();
            store.has_challenge(&name)?;
            // Top-level, non-orchestrated invocation: this is the one place
            // the supervisor's exit-on-error mode is armed.
            let supervisor = Supervisor::new(status.clone()).exit_on_error(exit_err);
            let out = crate::ops::compile::run(
                &cfg,
                &name,
                &working_dir,
                coverage,
                inst_files,
                fix_files,
                &supervisor,
            );
            match out.error {
                Some(err) => {
                    status.fail(&err);
                    Err(HarnessError::Process(err).into())
                }
                None => Ok(()),
            }
        }
        Commands::Genpolls { challenge, count } => {
            store.has_challenge(&challenge)?;
            let supervisor = Supervisor::new(status.clone());
            let result = crate::ops::genpolls::run(&cfg, &challenge, count, &supervisor);
            match result.op.error {
                Some(err) => {
                    status.fail(&err);
                    Err(HarnessError::Process(err).into())
                }
                None => {
                    status.ok(&format!("Generated {} polls.", result.generated));
                    Ok(())
                }
            }
        }
        Commands::Info { challenge } => {
            match challenge {
                Some(name) => {
                    store.has_challenge(&name)?;
                    let meta = store.get(&name).expect("checked above");
                    println!("{}", serde_json::to_string_pretty(meta)?);
                }
                None => {
                    for name in store.challenge_names(cli.excl) {
                        println!("{name}");
                    }
                }
            }
            Ok(())
        }
    }
}

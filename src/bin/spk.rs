//! spk
//!
//! Tool for building and checking signed package files

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spk_rs::{
    default_package_path, default_unpack_dir, pack, unpack, verify, AppId, Compression, KeyPair,
    PackageOptions,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spk", version)]
#[command(about = "Tool for building and checking signed package files")]
#[command(
    long_about = "Packages are compressed archives prefixed with a cryptographic signature, \
                  proving that updates came from the same source. This tool creates, signs, \
                  verifies and unpacks them."
)]
struct Cli {
    /// Only print the app ID, not the file name
    #[arg(short = 'o', long, global = true)]
    only_id: bool,

    /// External compressor program (run with -zc / -dc), e.g. xz
    #[arg(long, global = true)]
    compressor: Option<String>,

    /// zstd compression level for the built-in compressor
    #[arg(long, global = true, conflicts_with = "compressor")]
    level: Option<i32>,

    /// TOML file with package options
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for intermediate temp files
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new keyfile
    ///
    /// Store the output somewhere safe: losing it means you can no longer
    /// update your app, and anyone who gets it can hijack your app.
    Keygen {
        /// Key files to create
        #[arg(required = true)]
        outputs: Vec<PathBuf>,
    },
    /// Print the app ID of existing keyfiles
    Appid {
        /// Key files to read
        #[arg(required = true)]
        keyfiles: Vec<PathBuf>,
    },
    /// Create a package from a directory tree and a signing key
    Pack {
        /// Directory to pack
        dirname: PathBuf,
        /// Key file to sign with
        keyfile: PathBuf,
        /// Output file [default: <dirname>.spk]
        output: Option<PathBuf>,
    },
    /// Check a package's signature and unpack it to a directory
    Unpack {
        /// Package to unpack
        spkfile: PathBuf,
        /// Output directory [default: <spkfile> without .spk]
        outdir: Option<PathBuf>,
    },
    /// Check package signatures without unpacking
    Verify {
        /// Packages to check
        #[arg(required = true)]
        spkfiles: Vec<PathBuf>,
    },
}

/// A problem with a user-supplied file, reported as `*** <file>: <message>`
#[derive(Debug)]
struct ValidationFailure {
    filename: PathBuf,
    message: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*** {}: {}", self.filename.display(), self.message)
    }
}

impl std::error::Error for ValidationFailure {}

fn validation_error(filename: &Path, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(ValidationFailure {
        filename: filename.to_path_buf(),
        message: message.into(),
    })
}

/// Turn bad-input errors into validation failures; everything else is fatal
fn check<T>(filename: &Path, result: spk_rs::Result<T>) -> Result<T> {
    result.map_err(|e| {
        if e.is_validation() || e.is_cryptographic() {
            validation_error(filename, e.to_string())
        } else {
            anyhow::Error::new(e).context(filename.display().to_string())
        }
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ValidationFailure>() {
                Some(failure) => eprintln!("{}", failure),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let options = package_options(cli)?;

    match &cli.command {
        Commands::Keygen { outputs } => {
            for output in outputs {
                let key = KeyPair::generate();
                check(output, key.write_to_file(output))?;
                print_app_id(cli, key.app_id(), output);
            }
        }
        Commands::Appid { keyfiles } => {
            for keyfile in keyfiles {
                let key = read_key(keyfile)?;
                print_app_id(cli, key.app_id(), keyfile);
            }
        }
        Commands::Pack {
            dirname,
            keyfile,
            output,
        } => {
            if !dirname.exists() {
                return Err(validation_error(dirname, "Not found."));
            }
            let key = read_key(keyfile)?;
            let output = output
                .clone()
                .unwrap_or_else(|| default_package_path(dirname));

            let app_id = check(&output, pack(dirname, &key, &output, &options))?;
            print_app_id(cli, app_id, &output);
        }
        Commands::Unpack { spkfile, outdir } => {
            if !spkfile.exists() {
                return Err(validation_error(spkfile, "Not found."));
            }
            let outdir = match outdir {
                Some(dir) => dir.clone(),
                None => default_unpack_dir(spkfile).ok_or_else(|| {
                    validation_error(
                        spkfile,
                        "Name does not end in .spk; specify an output directory.",
                    )
                })?,
            };
            if outdir.symlink_metadata().is_ok() {
                return Err(validation_error(&outdir, "Output directory already exists."));
            }

            let unpacked = check(spkfile, unpack(spkfile, &outdir, &options))?;
            print_app_id(cli, unpacked.app_id, spkfile);
        }
        Commands::Verify { spkfiles } => {
            for spkfile in spkfiles {
                if !spkfile.exists() {
                    return Err(validation_error(spkfile, "Not found."));
                }
                let verified = check(spkfile, verify(spkfile, &options))?;
                check(spkfile, verified.archive())?;
                print_app_id(cli, verified.app_id(), spkfile);
            }
        }
    }

    Ok(())
}

fn package_options(cli: &Cli) -> Result<PackageOptions> {
    let mut options = match &cli.config {
        Some(path) => PackageOptions::from_toml_file(path)
            .with_context(|| format!("Loading options from {}", path.display()))?,
        None => PackageOptions::default(),
    };

    if let Some(program) = &cli.compressor {
        options = options.with_compression(Compression::External {
            program: program.clone(),
        });
    }
    if let Some(level) = cli.level {
        options = options.with_compression(Compression::Zstd { level });
    }
    if let Some(dir) = &cli.temp_dir {
        options = options.with_temp_dir(dir);
    }

    Ok(options)
}

fn read_key(keyfile: &Path) -> Result<KeyPair> {
    if !keyfile.exists() {
        return Err(validation_error(keyfile, "No such file."));
    }
    check(keyfile, KeyPair::read_from_file(keyfile))
}

fn print_app_id(cli: &Cli, app_id: AppId, filename: &Path) {
    if cli.only_id {
        println!("{}", app_id);
    } else {
        println!("{} {}", app_id, filename.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spk_rs::SpkError;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pack_arguments() {
        let cli = Cli::try_parse_from(["spk", "pack", "-o", "app", "app.key"]).unwrap();
        assert!(cli.only_id);
        match cli.command {
            Commands::Pack {
                dirname,
                keyfile,
                output,
            } => {
                assert_eq!(dirname, PathBuf::from("app"));
                assert_eq!(keyfile, PathBuf::from("app.key"));
                assert_eq!(output, None);
            }
            other => panic!("Expected pack, got {:?}", other),
        }
    }

    #[test]
    fn test_compressor_overrides_config() {
        let cli = Cli::try_parse_from(["spk", "--compressor", "xz", "verify", "a.spk"]).unwrap();
        let options = package_options(&cli).unwrap();
        assert_eq!(options.compression, Compression::xz());
    }

    #[test]
    fn test_validation_message_format() {
        let err = check::<()>(Path::new("bad.spk"), Err(SpkError::BadMagic)).unwrap_err();
        let failure = err.downcast_ref::<ValidationFailure>().unwrap();
        assert_eq!(
            failure.to_string(),
            "*** bad.spk: Does not appear to be an .spk (bad magic number)"
        );
    }
}

use crate::outline::OutlineOptions;
use crate::utils::sanitize_file_name;
use anyhow::{Context, Result};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[cfg(feature = "cover")]
use crate::cover::{DEFAULT_TIMEOUT_SECS, UnsplashConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub title: String,
    pub author: String,
    /// Directory holding SUMMARY.md, the chapters and `res/`
    pub base_dir: PathBuf,
    pub language: String,
    pub outline: OutlineOptions,
    /// Build without a cover and never hit the network
    pub no_cover: bool,
    pub verbosity: u8,
    #[cfg(feature = "cover")]
    pub unsplash: UnsplashConfig,
}

impl Config {
    pub fn new(title: impl Into<String>, author: impl Into<String>, base_dir: PathBuf) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            base_dir,
            language: "en".to_string(),
            outline: OutlineOptions::default(),
            no_cover: false,
            verbosity: 0,
            #[cfg(feature = "cover")]
            unsplash: UnsplashConfig::default(),
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.base_dir.join("SUMMARY.md")
    }

    pub fn cover_path(&self) -> PathBuf {
        self.base_dir.join("res").join("images").join("cover.jpg")
    }

    pub fn stylesheet_path(&self) -> PathBuf {
        self.base_dir.join("res").join("css").join("style.css")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.base_dir.join("out")
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir()
            .join(format!("{}.epub", sanitize_file_name(&self.title)))
    }
}

/// Directory used when none is given: `books/<title>/`.
pub fn default_base_dir(title: &str) -> PathBuf {
    PathBuf::from("books").join(sanitize_file_name(title))
}

pub fn build_command() -> Command {
    Command::new("md2epub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds an EPUB from a SUMMARY.md and its Markdown chapters")
        .arg(
            Arg::new("title")
                .short('t')
                .long("title")
                .value_name("TITLE")
                .help("Book title (prompted for when missing)")
                .num_args(1),
        )
        .arg(
            Arg::new("author")
                .short('a')
                .long("author")
                .value_name("AUTHOR")
                .env("DEFAULT_AUTHORS")
                .help("Book author; the environment value is the prompt default")
                .num_args(1),
        )
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("DIR")
                .help("Markdown source directory (default: books/<title>/)")
                .num_args(1),
        )
        .arg(
            Arg::new("language")
                .short('l')
                .long("language")
                .value_name("LANG")
                .env("BOOK_LANGUAGE")
                .default_value("en")
                .help("Book language code")
                .num_args(1),
        )
        .arg(
            Arg::new("max-depth")
                .long("max-depth")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .default_value("2")
                .help("Deepest outline level turned into pages"),
        )
        .arg(
            Arg::new("no-cover")
                .long("no-cover")
                .action(ArgAction::SetTrue)
                .help("Build without a cover image"),
        )
        .arg(
            Arg::new("no-prompt")
                .short('y')
                .long("no-prompt")
                .action(ArgAction::SetTrue)
                .help("Never prompt; use defaults for anything not given"),
        )
        .arg(
            Arg::new("unsplash-client-id")
                .long("unsplash-client-id")
                .value_name("KEY")
                .env("UNSPLASH_CLIENT_ID")
                .hide_env_values(true)
                .help("Unsplash access key used to fetch a cover"),
        )
        .arg(
            Arg::new("unsplash-orientation")
                .long("unsplash-orientation")
                .value_name("ORIENTATION")
                .env("UNSPLASH_ORIENTATION")
                .help("Cover orientation: landscape, portrait or squarish"),
        )
        .arg(
            Arg::new("unsplash-query")
                .long("unsplash-query")
                .value_name("QUERY")
                .env("UNSPLASH_QUERY")
                .help("Search term for the cover photo"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .default_value("30")
                .help("HTTP timeout for cover requests"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("More log output (-v info, -vv debug, -vvv trace)"),
        )
}

/// Parses the command line, prompting on the terminal for missing values.
///
/// Returns `Ok(None)` when no title was given, in which case nothing should
/// be built.
pub fn parse_args() -> Result<Option<Config>> {
    let matches = build_command().get_matches();
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    config_from_matches(&matches, &mut input, &mut output)
}

pub fn config_from_matches<R: BufRead, W: Write>(
    matches: &ArgMatches,
    input: &mut R,
    output: &mut W,
) -> Result<Option<Config>> {
    let interactive = !matches.get_flag("no-prompt");

    let title = match matches.get_one::<String>("title") {
        Some(title) => title.trim().to_string(),
        None if interactive => prompt(input, output, "Book title: ")?,
        None => String::new(),
    };
    if title.is_empty() {
        return Ok(None);
    }

    let default_author = matches
        .get_one::<String>("author")
        .cloned()
        .unwrap_or_default();
    let author = if interactive && matches.value_source("author") != Some(ValueSource::CommandLine) {
        let answer = prompt(
            input,
            output,
            &format!("Author (default: {}): ", default_author),
        )?;
        if answer.is_empty() { default_author } else { answer }
    } else {
        default_author
    };

    let default_dir = default_base_dir(&title);
    let base_dir = match matches.get_one::<String>("dir") {
        Some(dir) => PathBuf::from(dir),
        None if interactive => {
            let answer = prompt(
                input,
                output,
                &format!("Markdown directory (default: {}): ", default_dir.display()),
            )?;
            if answer.is_empty() {
                default_dir
            } else {
                PathBuf::from(answer)
            }
        }
        None => default_dir,
    };

    let mut config = Config::new(title, author, base_dir);
    if let Some(language) = matches.get_one::<String>("language") {
        config.language = language.clone();
    }
    if let Some(depth) = matches.get_one::<usize>("max-depth") {
        config.outline.max_depth = *depth;
    }
    config.no_cover = matches.get_flag("no-cover");
    config.verbosity = matches.get_count("verbose");

    #[cfg(feature = "cover")]
    {
        config.unsplash = UnsplashConfig {
            client_id: matches.get_one::<String>("unsplash-client-id").cloned(),
            orientation: matches.get_one::<String>("unsplash-orientation").cloned(),
            query: matches.get_one::<String>("unsplash-query").cloned(),
            timeout_secs: matches
                .get_one::<u64>("timeout")
                .copied()
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ..UnsplashConfig::default()
        };
    }

    Ok(Some(config))
}

/// Shows `message` and reads one trimmed line of input.
pub fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, message: &str) -> Result<String> {
    write!(output, "{}", message).context("Failed to write prompt")?;
    output.flush().context("Failed to flush prompt")?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read from standard input")?;
    Ok(line.trim().to_string())
}

/// Sets up `env_logger`; `RUST_LOG` wins over `-v`.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(args: &[&str], answers: &str) -> (Option<Config>, String) {
        let matches = build_command()
            .try_get_matches_from(std::iter::once("md2epub").chain(args.iter().copied()))
            .unwrap();
        let mut input = Cursor::new(answers.as_bytes().to_vec());
        let mut output = Vec::new();
        let config = config_from_matches(&matches, &mut input, &mut output).unwrap();
        (config, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_blank_title_aborts() {
        let (config, shown) = run(&[], "\n");
        assert!(config.is_none());
        assert!(shown.contains("Book title"));
    }

    #[test]
    fn test_prompts_fall_back_to_defaults() {
        let (config, _) = run(&["--author", "Cli Author", "-t", "Rust Notes"], "\n");
        let config = config.unwrap();
        assert_eq!(config.title, "Rust Notes");
        assert_eq!(config.author, "Cli Author");
        assert_eq!(config.base_dir, PathBuf::from("books/Rust Notes"));
    }

    #[test]
    fn test_prompted_values_are_used() {
        let (config, shown) = run(&[], "My Book\nJane Roe\nsrc/book\n");
        let config = config.unwrap();
        assert_eq!(config.title, "My Book");
        assert_eq!(config.author, "Jane Roe");
        assert_eq!(config.base_dir, PathBuf::from("src/book"));
        assert!(shown.contains("Markdown directory (default: books/My Book)"));
    }

    #[test]
    fn test_no_prompt_uses_flags_only() {
        let (config, shown) = run(
            &["-y", "-t", "Guide", "-d", "docs", "--max-depth", "3", "--no-cover", "-vv"],
            "",
        );
        let config = config.unwrap();
        assert!(shown.is_empty());
        assert_eq!(config.base_dir, PathBuf::from("docs"));
        assert_eq!(config.outline.max_depth, 3);
        assert!(config.no_cover);
        assert_eq!(config.verbosity, 2);
    }

    #[test]
    fn test_conventional_paths() {
        let config = Config::new("A/B", "X", PathBuf::from("books/ab"));
        assert_eq!(config.summary_path(), PathBuf::from("books/ab/SUMMARY.md"));
        assert_eq!(config.cover_path(), PathBuf::from("books/ab/res/images/cover.jpg"));
        assert_eq!(config.stylesheet_path(), PathBuf::from("books/ab/res/css/style.css"));
        assert_eq!(config.output_path(), PathBuf::from("books/ab/out/A_B.epub"));
    }
}

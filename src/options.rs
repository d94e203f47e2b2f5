//! Parsing Options.
//! `--net {file}` 指定待运行的网（`.json` 或 `.ron`），其余参数覆盖配置文件。

use clap::{Arg, ArgAction, Command};
use std::error::Error;

use crate::net::structure::{DEFAULT_TOKEN, Weight};

fn make_options_parser() -> clap::Command {
    let parser = Command::new("xschema")
        .no_binary_name(true)
        .version("v0.1.0")
        .about("Runs an executable Petri net and records every firing")
        .arg(
            Arg::new("net")
                .short('n')
                .long("net")
                .value_name("FILE")
                .help("Net document to run (.json or .ron)")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Runner configuration")
                .default_value("xschema.toml"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Path to the CSV firing report")
                .default_value("firings.csv"),
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("limit")
                .short('l')
                .long("limit")
                .help("Firing limit")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("mark")
                .short('m')
                .long("mark")
                .value_name("PLACE[:COLOR]=COUNT")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("parameters")
                .short('p')
                .long("parameters")
                .value_name("FILE")
                .help("JSON parameters of external transitions"),
        );
    parser
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub place: String,
    pub color: String,
    pub count: Weight,
}

#[derive(Debug, Default)]
pub struct Options {
    pub net: String,
    pub config: String,
    pub output: String,
    pub seed: Option<u64>,
    pub limit: Option<u64>,
    pub marks: Vec<Mark>,
    pub parameters: Option<String>,
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    pub fn parse_from_args(flags: &[String]) -> Result<Self, Box<dyn Error>> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;

        let string = |id: &str| matches.get_one::<String>(id).cloned();
        let marks = matches
            .get_many::<String>("mark")
            .into_iter()
            .flatten()
            .map(String::as_str)
            .map(parse_mark)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Options {
            net: string("net").ok_or("missing --net")?,
            config: string("config").unwrap_or_default(),
            output: string("output").unwrap_or_default(),
            seed: matches.get_one::<u64>("seed").copied(),
            limit: matches.get_one::<u64>("limit").copied(),
            marks,
            parameters: string("parameters"),
        })
    }
}

fn parse_mark(text: &str) -> Result<Mark, Box<dyn Error>> {
    let (target, count) = text
        .rsplit_once('=')
        .ok_or_else(|| format!("mark `{text}` is not PLACE=COUNT"))?;
    let (place, color) = match target.split_once(':') {
        Some((place, color)) => (place, color),
        None => (target, DEFAULT_TOKEN),
    };
    Ok(Mark {
        place: place.to_string(),
        color: color.to_string(),
        count: count.trim().parse()?,
    })
}

use std::{env, path::PathBuf};

use anyhow::{Context, Result, anyhow};

const USAGE: &str = "usage: summarion [--config <path>] --input <messages.json> --mode <family[@version]> \
--namespace <ns> [--refresh-canonical] [--focus <text>] [--max-items <n>] [--language <lang>]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub input_path: PathBuf,
    pub mode: String,
    pub namespace: String,
    pub refresh_canonical: bool,
    pub focus: Option<String>,
    pub max_items: Option<usize>,
    pub language: Option<String>,
}

pub fn args_from_env() -> Result<CliArgs> {
    let default_config = env::current_dir()?.join("summarion.jsonc");
    parse_args(env::args().skip(1), default_config)
}

pub fn parse_args(
    args: impl IntoIterator<Item = String>,
    default_config: PathBuf,
) -> Result<CliArgs> {
    let mut config_path = None;
    let mut input_path = None;
    let mut mode = None;
    let mut namespace = None;
    let mut refresh_canonical = false;
    let mut focus = None;
    let mut max_items = None;
    let mut language = None;

    let mut args = args.into_iter();
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--refresh-canonical" => refresh_canonical = true,
            "--config" => config_path = Some(PathBuf::from(value_for(&flag, args.next())?)),
            "--input" => input_path = Some(PathBuf::from(value_for(&flag, args.next())?)),
            "--mode" => mode = Some(value_for(&flag, args.next())?),
            "--namespace" => namespace = Some(value_for(&flag, args.next())?),
            "--focus" => focus = Some(value_for(&flag, args.next())?),
            "--language" => language = Some(value_for(&flag, args.next())?),
            "--max-items" => {
                let raw = value_for(&flag, args.next())?;
                max_items = Some(
                    raw.parse::<usize>()
                        .with_context(|| format!("--max-items expects a number, got '{raw}'"))?,
                );
            }
            other => return Err(anyhow!("unexpected argument '{other}'\n{USAGE}")),
        }
    }

    Ok(CliArgs {
        config_path: config_path.unwrap_or(default_config),
        input_path: input_path.ok_or_else(|| anyhow!("--input is required\n{USAGE}"))?,
        mode: mode.ok_or_else(|| anyhow!("--mode is required\n{USAGE}"))?,
        namespace: namespace.ok_or_else(|| anyhow!("--namespace is required\n{USAGE}"))?,
        refresh_canonical,
        focus,
        max_items,
        language,
    })
}

fn value_for(flag: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.starts_with("--") => Ok(value),
        _ => Err(anyhow!("{flag} expects a value\n{USAGE}")),
    }
}

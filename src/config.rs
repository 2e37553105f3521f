//! Configuration parsing for the resolver

use crate::types::Site;
use anyhow::{Context, Result};
use std::net::IpAddr;
use std::time::Duration;

pub const DNS_PORT: u16 = 53;
pub const MAX_DEPTH: usize = 16;
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const IPV6_PROBE_SERVER: &str = "2001:4860:4860::8888";
pub const IPV6_PROBE_NAME: &str = "google.com";

/// IANA root servers, in the order they are tried.
pub static ROOT_SERVERS: &[(&str, &str)] = &[
    ("a.root-servers.net", "198.41.0.4"),
    ("b.root-servers.net", "199.9.14.201"),
    ("c.root-servers.net", "192.33.4.12"),
    ("d.root-servers.net", "199.7.91.13"),
    ("e.root-servers.net", "192.203.230.10"),
    ("f.root-servers.net", "192.5.5.241"),
    ("g.root-servers.net", "192.112.36.4"),
    ("h.root-servers.net", "198.97.190.53"),
    ("i.root-servers.net", "192.36.148.17"),
    ("j.root-servers.net", "192.58.128.30"),
    ("k.root-servers.net", "193.0.14.129"),
    ("l.root-servers.net", "199.7.83.42"),
    ("m.root-servers.net", "202.12.27.33"),
];

pub fn default_roots() -> Vec<Site> {
    ROOT_SERVERS.iter().map(|(name, ip)| Site::new(*name, *ip)).collect()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    /// `None` is unbounded, `Some(0)` disables the cache.
    pub cache_size: Option<usize>,
    pub dns_port: u16,
    pub max_depth: usize,
    pub timeout: Duration,
    pub roots: Vec<Site>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            cache_size: None,
            dns_port: DNS_PORT,
            max_depth: MAX_DEPTH,
            timeout: DEFAULT_TIMEOUT,
            roots: default_roots(),
        }
    }
}

#[derive(Clone, Debug)]
struct Directive {
    name: String,
    line: usize,
    args: Vec<String>,
    block: Vec<Directive>,
}

#[derive(Debug, PartialEq)]
enum Token { Word(String), Open, Close, EndOfLine }

type Tokens = std::iter::Peekable<std::vec::IntoIter<(usize, Token)>>;

impl Config {
    /// Load configuration from a file path
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut tokens = lex(content).into_iter().peekable();
        let mut cfg = Config::default();
        for directive in parse_directives(&mut tokens, false)? {
            cfg.apply(&directive)
                .with_context(|| format!("line {}: '{}'", directive.line, directive.name))?;
        }
        Ok(cfg)
    }

    fn apply(&mut self, d: &Directive) -> Result<()> {
        let first = move || d.args.first().ok_or_else(|| anyhow::anyhow!("needs an argument"));
        match d.name.as_str() {
            "listen" => self.listen = first()?.clone(),
            "cache" => {
                let size: i64 = first()?.parse()?;
                // A negative size keeps the cache unbounded.
                self.cache_size = usize::try_from(size).ok();
            }
            "dns_port" => self.dns_port = first()?.parse()?,
            "max_depth" => self.max_depth = first()?.parse()?,
            "timeout" => self.timeout = parse_duration(first()?)?,
            "roots" => self.roots = parse_roots(&d.block)?,
            other => tracing::warn!("Ignoring unknown configuration directive '{}' on line {}", other, d.line),
        }
        Ok(())
    }
}

fn parse_roots(entries: &[Directive]) -> Result<Vec<Site>> {
    if entries.is_empty() {
        anyhow::bail!("block must list at least one server");
    }
    entries
        .iter()
        .map(|entry| match entry.args.first() {
            Some(ip) if ip.parse::<IpAddr>().is_ok() => Ok(Site::new(entry.name.clone(), ip.clone())),
            Some(ip) => anyhow::bail!("line {}: root '{}' has invalid address '{}'", entry.line, entry.name, ip),
            None => anyhow::bail!("line {}: root '{}' has no address", entry.line, entry.name),
        })
        .collect()
}

/// Splits the input into words and braces, tagged with their 1-based line. `#` comments run to end of line.
fn lex(input: &str) -> Vec<(usize, Token)> {
    let mut tokens = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or_default();
        for chunk in content.split_whitespace() {
            let mut word = String::new();
            for c in chunk.chars() {
                if c != '{' && c != '}' {
                    word.push(c);
                    continue;
                }
                if !word.is_empty() {
                    tokens.push((line, Token::Word(std::mem::take(&mut word))));
                }
                tokens.push((line, if c == '{' { Token::Open } else { Token::Close }));
            }
            if !word.is_empty() {
                tokens.push((line, Token::Word(word)));
            }
        }
        tokens.push((line, Token::EndOfLine));
    }
    tokens
}

/// Reads directives until end of input or, when `nested`, the matching `}`.
fn parse_directives(tokens: &mut Tokens, nested: bool) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();
    while let Some((line, token)) = tokens.next() {
        match token {
            Token::EndOfLine => {}
            Token::Close if nested => return Ok(directives),
            Token::Close => anyhow::bail!("line {}: unbalanced '}}'", line),
            Token::Open => anyhow::bail!("line {}: block opened without a directive name", line),
            Token::Word(name) => {
                let mut args = Vec::new();
                while let Some((_, Token::Word(_))) = tokens.peek() {
                    if let Some((_, Token::Word(arg))) = tokens.next() {
                        args.push(arg);
                    }
                }
                let block = if matches!(tokens.peek(), Some((_, Token::Open))) {
                    tokens.next();
                    parse_directives(tokens, true)
                        .with_context(|| format!("block of '{}' opened on line {}", name, line))?
                } else {
                    Vec::new()
                };
                directives.push(Directive { name, line, args, block });
            }
        }
    }
    if nested {
        anyhow::bail!("block is never closed");
    }
    Ok(directives)
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") { Ok(Duration::from_millis(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('s') { Ok(Duration::from_secs(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('m') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 60)) }
    else { anyhow::bail!("invalid duration '{}'", s) }
}

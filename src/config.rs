/*! The declarative config file and the interface model it produces.

A config file is a whitespace-insensitive sequence of `iface NAME { ... };`
statements; `#` starts a comment.  Parsing produces a `Vec<IfaceConfig>`
which [`IfaceTable::from_config`](crate::iface::IfaceTable::from_config)
consumes.
Everything that can be rejected at load time is rejected here, so the
packet plane never sees a half-valid policy.
*/

use crate::pdu::{EapCode, EapolType};
use crate::policy::{ActionTable, FilterMask, TciDirective};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/eapol-proxy.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: u32 },
    #[error("line {line}: unexpected character {c:?}")]
    UnexpectedChar { line: u32, c: char },
    #[error("line {line}: expected {expected}, saw {saw:?}")]
    Expected {
        line: u32,
        expected: &'static str,
        saw: String,
    },
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("line {line}: unknown directive {dir:?}")]
    UnknownDirective { line: u32, dir: String },
    #[error("line {line}: duplicate {dir:?}")]
    Duplicate { line: u32, dir: String },
    #[error("line {line}: unknown filter token {token:?}")]
    UnknownFilterToken { line: u32, token: String },
    #[error("line {line}: unknown packet classification {token:?}")]
    UnknownExecToken { line: u32, token: String },
    #[error("line {line}: {what} {saw} is out of range (max {max})")]
    OutOfRange {
        line: u32,
        what: &'static str,
        saw: String,
        max: u32,
    },
    #[error("line {line}: bad MAC address {mac:?}")]
    BadMac { line: u32, mac: String },
    #[error("at least two interfaces must be configured")]
    TooFewIfaces,
    #[error("interface {0:?} is declared twice")]
    DuplicateIface(String),
    #[error("set-mac and set-mac-from are mutually exclusive on {0:?}")]
    MacConflict(String),
    #[error("{iface:?}: set-mac-from {target:?} does not name another configured interface")]
    BadMacSource { iface: String, target: String },
    #[error("script {0:?} is not an absolute, canonical path")]
    ScriptNotAbsolute(PathBuf),
    #[error("script {0:?} is not executable")]
    ScriptNotExecutable(PathBuf),
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct IngressConfig {
    pub filter: Option<FilterMask>,
    pub exec: ActionTable,
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct EgressConfig {
    pub dot1q: Option<TciDirective>,
    pub filter: Option<FilterMask>,
    pub exec: ActionTable,
}

/// One `iface` block, validated but not yet bound to a kernel device.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct IfaceConfig {
    pub name: String,
    pub ingress: Option<IngressConfig>,
    pub egress: Option<EgressConfig>,
    pub promiscuous: bool,
    pub set_mac: Option<[u8; 6]>,
    /// Position in the config list of the interface to learn from.
    pub set_mac_from: Option<usize>,
}

/// Read and parse a config file, including the script executability
/// checks.
pub fn load(path: &Path) -> Result<Vec<IfaceConfig>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    let ifaces = parse(&text)?;
    check_scripts(&ifaces)?;
    Ok(ifaces)
}

/// Parse config text into the interface model.  Everything except
/// filesystem checks on script paths happens here.
pub fn parse(text: &str) -> Result<Vec<IfaceConfig>, ConfigError> {
    let tokens = lex(text)?;
    Parser { tokens, pos: 0 }.config()
}

/// Script paths must be absolute, canonical, and executable for the
/// effective user at load time, so a typo shows up at startup rather
/// than mid-handshake.
pub fn check_scripts(ifaces: &[IfaceConfig]) -> Result<(), ConfigError> {
    let tables = ifaces.iter().flat_map(|i| {
        let ingress = i.ingress.iter().map(|p| &p.exec);
        let egress = i.egress.iter().map(|p| &p.exec);
        ingress.chain(egress)
    });
    for script in tables.flat_map(ActionTable::scripts) {
        let canonical = script
            .components()
            .all(|c| matches!(c, Component::RootDir | Component::Normal(_)));
        if !script.is_absolute() || !canonical {
            return Err(ConfigError::ScriptNotAbsolute(script.to_owned()));
        }
        if nix::unistd::access(script, nix::unistd::AccessFlags::X_OK).is_err() {
            return Err(ConfigError::ScriptNotExecutable(script.to_owned()));
        }
    }
    Ok(())
}

#[derive(Clone, PartialEq, Eq, Debug)]
enum Token {
    Ident(String),
    Str(String),
    LBrace,
    RBrace,
    Semi,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) | Token::Str(s) => s.clone(),
            Token::LBrace => "{".to_owned(),
            Token::RBrace => "}".to_owned(),
            Token::Semi => ";".to_owned(),
        }
    }
}

fn lex(text: &str) -> Result<Vec<(Token, u32)>, ConfigError> {
    let mut tokens = Vec::new();
    let mut line = 1u32;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => (),
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '{' => tokens.push((Token::LBrace, line)),
            '}' => tokens.push((Token::RBrace, line)),
            ';' => tokens.push((Token::Semi, line)),
            ',' => (), // list separator; treated as whitespace
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(ConfigError::UnterminatedString { line })
                        }
                        Some(c) => s.push(c),
                    }
                }
                tokens.push((Token::Str(s), line));
            }
            c if c.is_ascii_alphanumeric() || "-_./:".contains(c) => {
                let mut s = String::new();
                s.push(c);
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || "-_./:".contains(c) {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(s), line));
            }
            c => return Err(ConfigError::UnexpectedChar { line, c }),
        }
    }
    Ok(tokens)
}

/// A classification token as it appears in `filter` and `exec` lists.
enum ClassToken {
    Type(EapolType),
    Code(EapCode),
    All,
}

fn class_token(s: &str) -> Option<ClassToken> {
    Some(match s {
        "all" => ClassToken::All,
        "eap" => ClassToken::Type(EapolType::Eap),
        "start" => ClassToken::Type(EapolType::Start),
        "logoff" => ClassToken::Type(EapolType::Logoff),
        "key" => ClassToken::Type(EapolType::Key),
        "encapsulated-asf-alert" => ClassToken::Type(EapolType::EncapsulatedAsfAlert),
        "mka" => ClassToken::Type(EapolType::Mka),
        "announcement-generic" => ClassToken::Type(EapolType::AnnouncementGeneric),
        "announcement-specific" => ClassToken::Type(EapolType::AnnouncementSpecific),
        "announcement-req" => ClassToken::Type(EapolType::AnnouncementReq),
        "request" => ClassToken::Code(EapCode::Request),
        "response" => ClassToken::Code(EapCode::Response),
        "success" => ClassToken::Code(EapCode::Success),
        "failure" => ClassToken::Code(EapCode::Failure),
        _ => return None,
    })
}

fn parse_mac(s: &str, line: u32) -> Result<[u8; 6], ConfigError> {
    let bad = || ConfigError::BadMac {
        line,
        mac: s.to_owned(),
    };
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut mac {
        let part = parts.next().ok_or_else(bad)?;
        if part.len() != 2 {
            return Err(bad());
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| bad())?;
    }
    if parts.next().is_some() {
        return Err(bad());
    }
    Ok(mac)
}

struct Parser {
    tokens: Vec<(Token, u32)>,
    pos: usize,
}

/// set-mac-from targets are recorded by name during the descent and
/// resolved to list positions once every block has been seen.
struct MacSource {
    iface: usize,
    target: String,
}

impl Parser {
    fn next(&mut self) -> Result<(Token, u32), ConfigError> {
        let t = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConfigError::UnexpectedEof)?;
        self.pos += 1;
        Ok(t)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn expect(&mut self, want: Token, expected: &'static str) -> Result<u32, ConfigError> {
        let (t, line) = self.next()?;
        if t == want {
            Ok(line)
        } else {
            Err(ConfigError::Expected {
                line,
                expected,
                saw: t.describe(),
            })
        }
    }

    fn ident(&mut self, expected: &'static str) -> Result<(String, u32), ConfigError> {
        match self.next()? {
            (Token::Ident(s), line) => Ok((s, line)),
            (t, line) => Err(ConfigError::Expected {
                line,
                expected,
                saw: t.describe(),
            }),
        }
    }

    fn string(&mut self, expected: &'static str) -> Result<(String, u32), ConfigError> {
        match self.next()? {
            (Token::Str(s), line) => Ok((s, line)),
            (t, line) => Err(ConfigError::Expected {
                line,
                expected,
                saw: t.describe(),
            }),
        }
    }

    fn number(&mut self, what: &'static str, max: u32) -> Result<u32, ConfigError> {
        let (s, line) = self.ident(what)?;
        let n = s.parse::<u32>().ok().filter(|&n| n <= max);
        n.ok_or(ConfigError::OutOfRange {
            line,
            what,
            saw: s,
            max,
        })
    }

    fn config(&mut self) -> Result<Vec<IfaceConfig>, ConfigError> {
        let mut ifaces: Vec<IfaceConfig> = Vec::new();
        let mut sources: Vec<MacSource> = Vec::new();
        while self.peek().is_some() {
            let (dir, line) = self.ident("iface")?;
            if dir != "iface" {
                return Err(ConfigError::UnknownDirective { line, dir });
            }
            let iface = self.iface(&mut sources, ifaces.len())?;
            if ifaces.iter().any(|i| i.name == iface.name) {
                return Err(ConfigError::DuplicateIface(iface.name));
            }
            ifaces.push(iface);
        }
        if ifaces.len() < 2 {
            return Err(ConfigError::TooFewIfaces);
        }
        for src in sources {
            let target = ifaces.iter().position(|i| i.name == src.target);
            match target {
                Some(t) if t != src.iface => ifaces[src.iface].set_mac_from = Some(t),
                _ => {
                    return Err(ConfigError::BadMacSource {
                        iface: ifaces[src.iface].name.clone(),
                        target: src.target,
                    })
                }
            }
        }
        Ok(ifaces)
    }

    fn iface(
        &mut self,
        sources: &mut Vec<MacSource>,
        position: usize,
    ) -> Result<IfaceConfig, ConfigError> {
        let (name, _) = self.ident("interface name")?;
        let mut iface = IfaceConfig {
            name,
            ..Default::default()
        };
        let mut has_mac_source = false;
        self.expect(Token::LBrace, "{")?;
        loop {
            match self.next()? {
                (Token::RBrace, _) => break,
                (Token::Ident(dir), line) => match dir.as_str() {
                    "ingress" => {
                        if iface.ingress.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        iface.ingress = Some(self.ingress()?);
                    }
                    "egress" => {
                        if iface.egress.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        iface.egress = Some(self.egress()?);
                    }
                    "promiscuous" => {
                        if iface.promiscuous {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        iface.promiscuous = true;
                        self.expect(Token::Semi, ";")?;
                    }
                    "set-mac" => {
                        if iface.set_mac.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        if has_mac_source {
                            return Err(ConfigError::MacConflict(iface.name));
                        }
                        let (mac, line) = self.string("MAC address")?;
                        iface.set_mac = Some(parse_mac(&mac, line)?);
                        self.expect(Token::Semi, ";")?;
                    }
                    "set-mac-from" => {
                        if has_mac_source {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        if iface.set_mac.is_some() {
                            return Err(ConfigError::MacConflict(iface.name));
                        }
                        has_mac_source = true;
                        let (target, _) = self.ident("interface name")?;
                        sources.push(MacSource {
                            iface: position,
                            target,
                        });
                        self.expect(Token::Semi, ";")?;
                    }
                    _ => return Err(ConfigError::UnknownDirective { line, dir }),
                },
                (t, line) => {
                    return Err(ConfigError::Expected {
                        line,
                        expected: "directive or }",
                        saw: t.describe(),
                    })
                }
            }
        }
        self.expect(Token::Semi, ";")?;
        Ok(iface)
    }

    fn ingress(&mut self) -> Result<IngressConfig, ConfigError> {
        let mut policy = IngressConfig::default();
        self.expect(Token::LBrace, "{")?;
        loop {
            match self.next()? {
                (Token::RBrace, _) => break,
                (Token::Ident(dir), line) => match dir.as_str() {
                    "filter" => {
                        if policy.filter.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        policy.filter = Some(self.filter()?);
                    }
                    "exec" => self.exec(&mut policy.exec)?,
                    _ => return Err(ConfigError::UnknownDirective { line, dir }),
                },
                (t, line) => {
                    return Err(ConfigError::Expected {
                        line,
                        expected: "filter, exec or }",
                        saw: t.describe(),
                    })
                }
            }
        }
        self.expect(Token::Semi, ";")?;
        Ok(policy)
    }

    fn egress(&mut self) -> Result<EgressConfig, ConfigError> {
        let mut policy = EgressConfig::default();
        self.expect(Token::LBrace, "{")?;
        loop {
            match self.next()? {
                (Token::RBrace, _) => break,
                (Token::Ident(dir), line) => match dir.as_str() {
                    "filter" => {
                        if policy.filter.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        policy.filter = Some(self.filter()?);
                    }
                    "exec" => self.exec(&mut policy.exec)?,
                    "dot1q" => {
                        if policy.dot1q.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        policy.dot1q = Some(self.dot1q()?);
                    }
                    "no" => {
                        let (word, line) = self.ident("dot1q")?;
                        if word != "dot1q" {
                            return Err(ConfigError::Expected {
                                line,
                                expected: "dot1q",
                                saw: word,
                            });
                        }
                        if policy.dot1q.is_some() {
                            return Err(ConfigError::Duplicate {
                                line,
                                dir: "dot1q".to_owned(),
                            });
                        }
                        policy.dot1q = Some(TciDirective::Strip);
                        self.expect(Token::Semi, ";")?;
                    }
                    _ => return Err(ConfigError::UnknownDirective { line, dir }),
                },
                (t, line) => {
                    return Err(ConfigError::Expected {
                        line,
                        expected: "filter, exec, dot1q or }",
                        saw: t.describe(),
                    })
                }
            }
        }
        self.expect(Token::Semi, ";")?;
        Ok(policy)
    }

    fn filter(&mut self) -> Result<FilterMask, ConfigError> {
        let mut mask = FilterMask::default();
        loop {
            match self.next()? {
                (Token::Semi, line) => {
                    if mask.is_empty() {
                        return Err(ConfigError::Expected {
                            line,
                            expected: "filter token",
                            saw: ";".to_owned(),
                        });
                    }
                    break;
                }
                (Token::Ident(token), line) => match class_token(&token) {
                    Some(ClassToken::All) => mask.add_all_types(),
                    Some(ClassToken::Type(ty)) => mask.add_type(ty),
                    Some(ClassToken::Code(code)) => mask.add_code(code),
                    None => return Err(ConfigError::UnknownFilterToken { line, token }),
                },
                (t, line) => {
                    return Err(ConfigError::Expected {
                        line,
                        expected: "filter token",
                        saw: t.describe(),
                    })
                }
            }
        }
        Ok(mask)
    }

    fn exec(&mut self, table: &mut ActionTable) -> Result<(), ConfigError> {
        let (token, line) = self.ident("packet classification")?;
        let (path, _) = self.string("script path")?;
        let script = PathBuf::from(path);
        let fresh = match class_token(&token) {
            Some(ClassToken::Type(ty)) => table.set_type(ty, script),
            Some(ClassToken::Code(code)) => table.set_code(code, script),
            _ => return Err(ConfigError::UnknownExecToken { line, token }),
        };
        if !fresh {
            return Err(ConfigError::Duplicate {
                line,
                dir: format!("exec {token}"),
            });
        }
        self.expect(Token::Semi, ";")?;
        Ok(())
    }

    fn dot1q(&mut self) -> Result<TciDirective, ConfigError> {
        let mut pcp = None;
        let mut dei = None;
        let mut vid = None;
        self.expect(Token::LBrace, "{")?;
        loop {
            match self.next()? {
                (Token::RBrace, _) => break,
                (Token::Ident(dir), line) => match dir.as_str() {
                    "priority" => {
                        if pcp.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        pcp = Some(self.number("priority", 7)? as u8);
                        self.expect(Token::Semi, ";")?;
                    }
                    "drop-eligible" => {
                        if dei.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        dei = Some(self.number("drop-eligible", 1)? as u8);
                        self.expect(Token::Semi, ";")?;
                    }
                    "id" => {
                        if vid.is_some() {
                            return Err(ConfigError::Duplicate { line, dir });
                        }
                        vid = Some(self.number("id", 4094)? as u16);
                        self.expect(Token::Semi, ";")?;
                    }
                    _ => return Err(ConfigError::UnknownDirective { line, dir }),
                },
                (t, line) => {
                    return Err(ConfigError::Expected {
                        line,
                        expected: "priority, drop-eligible, id or }",
                        saw: t.describe(),
                    })
                }
            }
        }
        self.expect(Token::Semi, ";")?;
        Ok(TciDirective::Rewrite { pcp, dei, vid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_pair() {
        let ifaces = parse("iface eth0 { }; iface eth1 { };").unwrap();
        assert_eq!(ifaces.len(), 2);
        assert_eq!(ifaces[0].name, "eth0");
        assert_eq!(ifaces[1].name, "eth1");
        assert!(!ifaces[0].promiscuous);
        assert_eq!(ifaces[0].ingress, None);
    }

    #[test]
    fn rejects_single_iface() {
        assert!(matches!(
            parse("iface eth0 { };"),
            Err(ConfigError::TooFewIfaces)
        ));
    }

    #[test]
    fn rejects_duplicate_iface() {
        assert!(matches!(
            parse("iface eth0 { }; iface eth0 { };"),
            Err(ConfigError::DuplicateIface(_))
        ));
    }

    #[test]
    fn full_example() {
        let ifaces = parse(
            r#"
            # upstream towards the authenticator
            iface eth0 {
                    ingress {
                            filter logoff, failure;
                            exec success "/opt/on-success.sh";
                    };
            };
            iface eth1 {
                    promiscuous;
                    set-mac-from eth0;
                    egress {
                            dot1q {
                                    priority 5;
                                    id 10;
                            };
                    };
            };
            "#,
        )
        .unwrap();
        assert_eq!(ifaces.len(), 2);
        let ingress = ifaces[0].ingress.as_ref().unwrap();
        let mask = ingress.filter.unwrap();
        assert!(mask.drops(EapolType::Logoff, None));
        assert!(mask.drops(EapolType::Eap, Some(EapCode::Failure)));
        assert!(!mask.drops(EapolType::Start, None));
        assert_eq!(
            ingress.exec.select(EapolType::Eap, Some(EapCode::Success)),
            Some(Path::new("/opt/on-success.sh"))
        );
        assert!(ifaces[1].promiscuous);
        assert_eq!(ifaces[1].set_mac_from, Some(0));
        assert_eq!(
            ifaces[1].egress.as_ref().unwrap().dot1q,
            Some(TciDirective::Rewrite {
                pcp: Some(5),
                dei: None,
                vid: Some(10),
            })
        );
    }

    #[test]
    fn set_mac_parses() {
        let ifaces =
            parse(r#"iface a { set-mac "02:ab:cd:ef:00:01"; }; iface b { };"#).unwrap();
        assert_eq!(ifaces[0].set_mac, Some([0x02, 0xab, 0xcd, 0xef, 0x00, 0x01]));
    }

    #[test]
    fn rejects_bad_mac() {
        assert!(matches!(
            parse(r#"iface a { set-mac "02:ab:cd:ef:00"; }; iface b { };"#),
            Err(ConfigError::BadMac { .. })
        ));
    }

    #[test]
    fn rejects_two_set_mac() {
        let err = parse(
            r#"iface a { set-mac "02:00:00:00:00:01"; set-mac "02:00:00:00:00:02"; };
               iface b { };"#,
        );
        assert!(matches!(err, Err(ConfigError::Duplicate { .. })));
    }

    #[test]
    fn rejects_set_mac_both_ways() {
        let err = parse(
            r#"iface a { set-mac "02:00:00:00:00:01"; set-mac-from b; }; iface b { };"#,
        );
        assert!(matches!(err, Err(ConfigError::MacConflict(_))));
    }

    #[test]
    fn rejects_self_mac_source() {
        assert!(matches!(
            parse("iface a { set-mac-from a; }; iface b { };"),
            Err(ConfigError::BadMacSource { .. })
        ));
    }

    #[test]
    fn rejects_unknown_mac_source() {
        assert!(matches!(
            parse("iface a { set-mac-from c; }; iface b { };"),
            Err(ConfigError::BadMacSource { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_dot1q() {
        for bad in [
            "priority 8;",
            "drop-eligible 2;",
            "id 4095;",
            "priority banana;",
        ] {
            let text =
                format!("iface a {{ egress {{ dot1q {{ {bad} }}; }}; }}; iface b {{ }};");
            assert!(
                matches!(parse(&text), Err(ConfigError::OutOfRange { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn no_dot1q_strips() {
        let ifaces = parse("iface a { egress { no dot1q; }; }; iface b { };").unwrap();
        assert_eq!(
            ifaces[0].egress.as_ref().unwrap().dot1q,
            Some(TciDirective::Strip)
        );
    }

    #[test]
    fn rejects_dot1q_and_no_dot1q() {
        let err = parse("iface a { egress { dot1q { }; no dot1q; }; }; iface b { };");
        assert!(matches!(err, Err(ConfigError::Duplicate { .. })));
    }

    #[test]
    fn filter_all() {
        let ifaces = parse("iface a { ingress { filter all; }; }; iface b { };").unwrap();
        let mask = ifaces[0].ingress.as_ref().unwrap().filter.unwrap();
        for ty in 0..9 {
            assert!(mask.drops(EapolType::from_u8(ty), None));
        }
    }

    #[test]
    fn rejects_unknown_filter_token() {
        assert!(matches!(
            parse("iface a { ingress { filter banana; }; }; iface b { };"),
            Err(ConfigError::UnknownFilterToken { .. })
        ));
    }

    #[test]
    fn rejects_exec_all() {
        assert!(matches!(
            parse(r#"iface a { ingress { exec all "/opt/x.sh"; }; }; iface b { };"#),
            Err(ConfigError::UnknownExecToken { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_exec() {
        let err = parse(
            r#"iface a { ingress { exec start "/a.sh"; exec start "/b.sh"; }; };
               iface b { };"#,
        );
        assert!(matches!(err, Err(ConfigError::Duplicate { .. })));
    }

    #[test]
    fn comments_and_whitespace() {
        let ifaces = parse(
            "iface a{ingress{filter start;};};#trailing comment\niface b{};",
        )
        .unwrap();
        assert_eq!(ifaces.len(), 2);
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse("iface a {\n    bogus;\n}; iface b { };");
        match err {
            Err(ConfigError::UnknownDirective { line, dir }) => {
                assert_eq!(line, 2);
                assert_eq!(dir, "bogus");
            }
            other => panic!("expected UnknownDirective, got {other:?}"),
        }
    }

    #[test]
    fn executable_scripts_pass() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ok.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let text = format!(
            r#"iface a {{ ingress {{ exec start "{}"; }}; }}; iface b {{ }};"#,
            script.display()
        );
        let ifaces = parse(&text).unwrap();
        check_scripts(&ifaces).unwrap();
    }

    #[test]
    fn rejects_non_executable_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("plain.txt");
        std::fs::write(&script, "not a script").unwrap();
        let text = format!(
            r#"iface a {{ ingress {{ exec start "{}"; }}; }}; iface b {{ }};"#,
            script.display()
        );
        let ifaces = parse(&text).unwrap();
        assert!(matches!(
            check_scripts(&ifaces),
            Err(ConfigError::ScriptNotExecutable(_))
        ));
    }

    #[test]
    fn rejects_relative_script() {
        let ifaces =
            parse(r#"iface a { ingress { exec start "x.sh"; }; }; iface b { };"#).unwrap();
        assert!(matches!(
            check_scripts(&ifaces),
            Err(ConfigError::ScriptNotAbsolute(_))
        ));
    }
}

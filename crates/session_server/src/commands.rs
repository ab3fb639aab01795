//! Outbound command builders.
//!
//! Commands travel to the client as JSON objects inside the poll response.
//! Optional fields are omitted entirely when not given, which the client
//! reads as "leave unchanged".

use crate::codec::parse_number;
use crate::error::ServerError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::warn;

/// Object name the client uses for the player avatar.
pub const PLAYER_OBJECT: &str = "Player_Human";

/// Component toggles in the order they were given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Components(Vec<(String, bool)>);

impl Components {
    /// Set a toggle; a repeated name keeps its first position.
    pub fn set(&mut self, name: &str, enabled: bool) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = enabled,
            None => self.0.push((name.to_string(), enabled)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Components {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, enabled) in &self.0 {
            map.serialize_entry(name, enabled)?;
        }
        map.end()
    }
}

/// Spawn a copy of `src` in the client's scene.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateCommand {
    cmd: &'static str,
    pub src: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    #[serde(flatten)]
    pub scale: Option<Scale>,
    #[serde(skip_serializing_if = "Components::is_empty")]
    pub components: Components,
}

impl CreateCommand {
    pub fn new(src: impl Into<String>, position: [f64; 3], rotation: [f64; 3]) -> Self {
        let [x, y, z] = position;
        let [rx, ry, rz] = rotation;
        Self {
            cmd: "create",
            src: src.into(),
            x,
            y,
            z,
            rx,
            ry,
            rz,
            color: None,
            rename: None,
            scale: None,
            components: Components::default(),
        }
    }

    pub fn to_json(&self) -> Result<String, ServerError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Scale {
    pub sx: f64,
    pub sy: f64,
    pub sz: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Rotation {
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

/// Modify or delete an existing object in the client's scene.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EditCommand {
    cmd: &'static str,
    pub target: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub delete: bool,
    #[serde(flatten)]
    pub position: Option<Position>,
    #[serde(flatten)]
    pub velocity: Option<Velocity>,
    #[serde(flatten)]
    pub rotation: Option<Rotation>,
    #[serde(flatten)]
    pub scale: Option<Scale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copytex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    #[serde(skip_serializing_if = "Components::is_empty")]
    pub components: Components,
}

impl EditCommand {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            cmd: "edit",
            target: target.into(),
            delete: false,
            position: None,
            velocity: None,
            rotation: None,
            scale: None,
            color: None,
            copytex: None,
            rename: None,
            components: Components::default(),
        }
    }

    /// Move the player avatar and stop it dead.
    pub fn teleport(x: f64, y: f64, z: f64) -> Self {
        let mut edit = Self::new(PLAYER_OBJECT);
        edit.position = Some(Position { x, y, z });
        edit.velocity = Some(Velocity {
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
        });
        edit
    }

    pub fn to_json(&self) -> Result<String, ServerError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Console argument parsing
// ============================================================================

/// Why a `create` / `edit` console line produced no command.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("{0}")]
    Usage(&'static str),
    #[error("Bad arguments: {0}")]
    BadArguments(String),
}

pub const CREATE_USAGE: &str = "See 'help' for full syntax. Not enough arguments.";
pub const EDIT_USAGE: &str = "Usage: edit <steamID> <targetName> ...";

fn number(token: &str) -> Result<f64, CommandError> {
    parse_number(token).ok_or_else(|| CommandError::BadArguments(format!("not a number: '{token}'")))
}

/// Reads the optional trailing tokens shared by `create` and `edit`.
struct Tokens<'a> {
    tokens: &'a [&'a str],
    idx: usize,
}

impl<'a> Tokens<'a> {
    fn next(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.idx).copied();
        self.idx += 1;
        token
    }

    fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.idx)
    }

    fn triple(&mut self) -> Result<[f64; 3], CommandError> {
        let mut out = [0.0; 3];
        for slot in &mut out {
            *slot = number(self.next().unwrap_or_default())?;
        }
        Ok(out)
    }

    fn word(&mut self) -> String {
        self.next().unwrap_or_default().to_string()
    }
}

/// `<component>:<on|off>`; anything other than `off` enables.
fn component_toggle(token: &str) -> Option<(&str, bool)> {
    token
        .split_once(':')
        .map(|(name, state)| (name, !state.eq_ignore_ascii_case("off")))
}

fn warn_unknown(token: &str) {
    warn!("Unknown token '{}' - ignored", token);
}

/// Parse `create <steamID> <src> x y z rx ry rz [options...]`.
/// `tokens` includes the verb. Returns the target steam ID and the command.
pub fn parse_create(tokens: &[&str]) -> Result<(String, CreateCommand), CommandError> {
    if tokens.len() < 9 {
        return Err(CommandError::Usage(CREATE_USAGE));
    }
    let mut args = Tokens { tokens, idx: 1 };
    let steam_id = args.word();
    let src = args.word();
    let position = args.triple()?;
    let rotation = args.triple()?;
    let mut command = CreateCommand::new(src, position, rotation);

    while let Some(token) = args.next() {
        if token.eq_ignore_ascii_case("color") && args.remaining() >= 1 {
            let color = args.word();
            if !color.eq_ignore_ascii_case("none") {
                command.color = Some(color);
            }
        } else if token.eq_ignore_ascii_case("rename") && args.remaining() >= 1 {
            command.rename = Some(args.word()).filter(|name| !name.is_empty());
        } else if token.eq_ignore_ascii_case("scale") && args.remaining() >= 3 {
            let [sx, sy, sz] = args.triple()?;
            command.scale = (sx != 1.0 || sy != 1.0 || sz != 1.0).then_some(Scale { sx, sy, sz });
        } else if let Some((name, enabled)) = component_toggle(token) {
            command.components.set(name, enabled);
        } else {
            warn_unknown(token);
        }
    }
    Ok((steam_id, command))
}

/// Parse `edit <steamID> <target> [options...]`.
/// `tokens` includes the verb. Returns the target steam ID and the command.
pub fn parse_edit(tokens: &[&str]) -> Result<(String, EditCommand), CommandError> {
    if tokens.len() < 3 {
        return Err(CommandError::Usage(EDIT_USAGE));
    }
    let mut args = Tokens { tokens, idx: 1 };
    let steam_id = args.word();
    let mut command = EditCommand::new(args.word());

    while let Some(token) = args.next() {
        let keyword = token.to_ascii_lowercase();
        match keyword.as_str() {
            "delete" => command.delete = true,
            "pos" if args.remaining() >= 3 => {
                let [x, y, z] = args.triple()?;
                command.position = Some(Position { x, y, z });
            }
            "rot" if args.remaining() >= 3 => {
                let [rx, ry, rz] = args.triple()?;
                command.rotation = Some(Rotation { rx, ry, rz });
            }
            "scale" if args.remaining() >= 3 => {
                let [sx, sy, sz] = args.triple()?;
                command.scale = Some(Scale { sx, sy, sz });
            }
            "color" if args.remaining() >= 1 => command.color = Some(args.word()),
            "copytex" if args.remaining() >= 1 => command.copytex = Some(args.word()),
            "rename" if args.remaining() >= 1 => {
                command.rename = Some(args.word()).filter(|name| !name.is_empty())
            }
            _ => match component_toggle(token) {
                Some((name, enabled)) => command.components.set(name, enabled),
                None => warn_unknown(token),
            },
        }
    }
    Ok((steam_id, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn teleport_zeroes_velocity() {
        let json = EditCommand::teleport(10.0, 0.0, 5.0).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"cmd":"edit","target":"Player_Human","x":10.0,"y":0.0,"z":5.0,"vx":0.0,"vy":0.0,"vz":0.0}"#
        );
    }

    #[test]
    fn create_with_options() {
        let (sid, cmd) = parse_create(&split(
            "create 765 Crate 1 2 3 0 90 0 color red rename Box scale 2 2 2 Rigidbody:off Light:on bogus",
        ))
        .unwrap();
        assert_eq!(sid, "765");
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"cmd":"create","src":"Crate","x":1.0,"y":2.0,"z":3.0,"rx":0.0,"ry":90.0,"rz":0.0,"color":"red","rename":"Box","sx":2.0,"sy":2.0,"sz":2.0,"components":{"Rigidbody":false,"Light":true}}"#
        );
    }

    #[test]
    fn create_omits_defaults() {
        let (_, cmd) =
            parse_create(&split("create 1 Crate 0 0 0 0 0 0 color none scale 1 1 1")).unwrap();
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"cmd":"create","src":"Crate","x":0.0,"y":0.0,"z":0.0,"rx":0.0,"ry":0.0,"rz":0.0}"#
        );
    }

    #[test]
    fn create_rejects_short_or_non_numeric_lines() {
        assert_eq!(
            parse_create(&split("create 1 Crate 0 0 0")),
            Err(CommandError::Usage(CREATE_USAGE))
        );
        assert!(matches!(
            parse_create(&split("create 1 Crate x 0 0 0 0 0")),
            Err(CommandError::BadArguments(_))
        ));
    }

    #[test]
    fn edit_collects_requested_changes() {
        let (sid, cmd) = parse_edit(&split(
            "edit 765 Door delete pos 1 2 3 rot 0 180 0 copytex Wall Collider:OFF Collider:on",
        ))
        .unwrap();
        assert_eq!(sid, "765");
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"cmd":"edit","target":"Door","delete":true,"x":1.0,"y":2.0,"z":3.0,"rx":0.0,"ry":180.0,"rz":0.0,"copytex":"Wall","components":{"Collider":true}}"#
        );
    }

    #[test]
    fn edit_ignores_truncated_keywords() {
        let (_, cmd) = parse_edit(&split("edit 1 Door pos 1 2")).unwrap();
        assert_eq!(cmd.position, None);
        assert_eq!(parse_edit(&split("edit 1")), Err(CommandError::Usage(EDIT_USAGE)));
    }
}

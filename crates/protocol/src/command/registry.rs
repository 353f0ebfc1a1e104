use super::apply::{ApplyError, apply_level, apply_player, apply_session, apply_sector, apply_thing};
use super::codec::{
    self, DecodeError, Fields, decode_level, decode_player, decode_sector, decode_session,
    decode_thing,
};
use super::{Command, CommandCode, ExtendedOpcode, Opcode};
use crate::client::ClientState;
use crate::net::PacketReader;

pub(crate) type DecodeFn = fn(&mut Fields<'_, '_>) -> Result<Command, DecodeError>;
pub(crate) type ApplyFn = fn(Command, &mut ClientState) -> Result<(), ApplyError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} is registered twice")]
    Duplicate(CommandCode),
    #[error("{0} has no handler")]
    Missing(CommandCode),
}

#[derive(Clone, Copy)]
pub(crate) struct Handler {
    pub code: CommandCode,
    pub decode: DecodeFn,
    pub apply: ApplyFn,
}

impl Handler {
    fn new(code: CommandCode, decode: DecodeFn, apply: ApplyFn) -> Self {
        Self {
            code,
            decode,
            apply,
        }
    }
}

/// The standard handler for `code`, chosen by the opcode's group.
fn default_handler(code: CommandCode) -> Handler {
    let (decode, apply): (DecodeFn, ApplyFn) = match code {
        CommandCode::Extended(ExtendedOpcode::FullUpdateCompleted) => {
            (decode_session, apply_session)
        }
        CommandCode::Extended(ExtendedOpcode::SetThingReactionTime) => (decode_thing, apply_thing),
        CommandCode::Base(op) => match op as u8 {
            0..=19 => (decode_session, apply_session),
            20..=49 => (decode_player, apply_player),
            50..=79 => (decode_thing, apply_thing),
            80..=109 => (decode_sector, apply_sector),
            _ => (decode_level, apply_level),
        },
    };
    Handler::new(code, decode, apply)
}

/// Maps every command code to its decode and apply functions. Built once and
/// checked so that each code has exactly one handler.
pub struct CommandRegistry {
    handlers: Vec<Option<Handler>>,
}

impl CommandRegistry {
    pub fn new() -> Result<Self, RegistryError> {
        Self::from_handlers(CommandCode::all().map(default_handler))
    }

    pub(crate) fn from_handlers(
        handlers: impl IntoIterator<Item = Handler>,
    ) -> Result<Self, RegistryError> {
        let size = 256 + ExtendedOpcode::ALL.len();
        let mut table: Vec<Option<Handler>> = vec![None; size];

        for handler in handlers {
            let entry = &mut table[handler.code.index()];
            if entry.is_some() {
                return Err(RegistryError::Duplicate(handler.code));
            }
            *entry = Some(handler);
        }

        if let Some(missing) = CommandCode::all().find(|code| table[code.index()].is_none()) {
            return Err(RegistryError::Missing(missing));
        }

        Ok(Self { handlers: table })
    }

    pub fn len(&self) -> usize {
        self.handlers.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_registered(&self, code: CommandCode) -> bool {
        self.handler(code).is_some()
    }

    fn handler(&self, code: CommandCode) -> Option<&Handler> {
        self.handlers.get(code.index())?.as_ref()
    }

    /// Decodes the next command. `Ok(None)` once the reader is exhausted.
    pub fn decode_next(&self, reader: &mut PacketReader<'_>) -> Result<Option<Command>, DecodeError> {
        let Some(code) = codec::read_code(reader)? else {
            return Ok(None);
        };
        let handler = self.handler(code).ok_or(DecodeError::Unregistered(code))?;
        let mut fields = Fields::new(reader, code);
        (handler.decode)(&mut fields).map(Some)
    }

    /// Decodes a whole command stream. Fails on the first bad command; what
    /// came before it is lost with it.
    pub fn decode_all(&self, payload: &[u8]) -> Result<Vec<Command>, DecodeError> {
        let mut reader = PacketReader::new(payload);
        let mut commands = Vec::new();
        while let Some(command) = self.decode_next(&mut reader)? {
            commands.push(command);
        }
        Ok(commands)
    }

    pub fn apply(&self, command: Command, state: &mut ClientState) -> Result<(), ApplyError> {
        let code = command.code();
        let handler = self.handler(code).ok_or(ApplyError::Unhandled(code))?;
        (handler.apply)(command, state)
    }

    pub fn name(&self, code: CommandCode) -> Option<String> {
        self.handler(code).map(|handler| handler.code.to_string())
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::PacketBuffer;
    use crate::world::NetId;

    #[test]
    fn test_every_code_is_registered() {
        let registry = CommandRegistry::new().unwrap();
        assert_eq!(registry.len(), CommandCode::all().count());
        assert!(registry.is_registered(CommandCode::Base(Opcode::SetTeamScore)));
        assert!(!registry.is_registered(CommandCode::Base(Opcode::Extended)));
    }

    #[test]
    fn test_duplicate_handler_is_rejected() {
        let code = CommandCode::Base(Opcode::Ping);
        let handlers = CommandCode::all()
            .map(default_handler)
            .chain(std::iter::once(default_handler(code)));
        assert_eq!(
            CommandRegistry::from_handlers(handlers).unwrap_err(),
            RegistryError::Duplicate(code)
        );
    }

    #[test]
    fn test_missing_handler_is_rejected() {
        let code = CommandCode::Extended(ExtendedOpcode::SetThingReactionTime);
        let handlers = CommandCode::all()
            .filter(|c| *c != code)
            .map(default_handler);
        assert_eq!(
            CommandRegistry::from_handlers(handlers).unwrap_err(),
            RegistryError::Missing(code)
        );
    }

    #[test]
    fn test_decode_all_keeps_append_order() {
        let registry = CommandRegistry::new().unwrap();
        let commands = vec![
            Command::BeginSnapshot,
            Command::SetMapTime { time: 700 },
            Command::HideThing { id: NetId(3) },
            Command::FullUpdateCompleted,
            Command::EndSnapshot,
        ];
        let mut buf = PacketBuffer::new(256);
        for command in &commands {
            command.encode(&mut buf);
        }
        assert_eq!(registry.decode_all(buf.as_bytes()).unwrap(), commands);
    }

    #[test]
    fn test_every_handler_group_decodes_its_own_codes() {
        let registry = CommandRegistry::new().unwrap();
        let samples = [
            Command::Ping { time: 5 },
            Command::WeaponChange {
                slot: 1,
                weapon: "Shotgun".into(),
            },
            Command::SetThingTid {
                id: NetId(2),
                tid: 9,
            },
            Command::FinishSectorMover { sector: 4 },
            Command::SetPolyobjRotation { poly: 1, angle: 90 },
        ];
        for sample in samples {
            let mut buf = PacketBuffer::new(64);
            sample.encode(&mut buf);
            let mut reader = PacketReader::new(buf.as_bytes());
            assert_eq!(registry.decode_next(&mut reader).unwrap(), Some(sample));
            assert!(reader.is_exhausted());
        }
    }
}

//! Client and agent capability definitions
//!
//! This module defines capability flags exchanged during `initialize`.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Client capabilities advertised to the agent
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ClientCapabilities: u8 {
        /// Client serves `fs/read_text_file`
        const FS_READ_TEXT_FILE = 0b001;
        /// Client serves `fs/write_text_file`
        const FS_WRITE_TEXT_FILE = 0b010;
        /// Client serves `terminal/*`
        const TERMINAL = 0b100;
    }
}

// Wire shape is nested booleans: {"fs":{"readTextFile":..,"writeTextFile":..},"terminal":..}
impl Serialize for ClientCapabilities {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Fs {
            read_text_file: bool,
            write_text_file: bool,
        }

        let mut state = serializer.serialize_struct("ClientCapabilities", 2)?;
        state.serialize_field(
            "fs",
            &Fs {
                read_text_file: self.contains(Self::FS_READ_TEXT_FILE),
                write_text_file: self.contains(Self::FS_WRITE_TEXT_FILE),
            },
        )?;
        state.serialize_field("terminal", &self.contains(Self::TERMINAL))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ClientCapabilities {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Fs {
            read_text_file: bool,
            write_text_file: bool,
        }

        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Helper {
            fs: Fs,
            terminal: bool,
        }

        let h = Helper::deserialize(deserializer)?;
        let mut caps = Self::empty();
        caps.set(Self::FS_READ_TEXT_FILE, h.fs.read_text_file);
        caps.set(Self::FS_WRITE_TEXT_FILE, h.fs.write_text_file);
        caps.set(Self::TERMINAL, h.terminal);
        Ok(caps)
    }
}

bitflags! {
    /// Capabilities advertised by the agent
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AgentCapabilities: u8 {
        /// Supports `session/load`
        const LOAD_SESSION = 0b0001;
        /// Accepts image prompt content
        const PROMPT_IMAGE = 0b0010;
        /// Accepts audio prompt content
        const PROMPT_AUDIO = 0b0100;
        /// Accepts embedded resource prompt content
        const PROMPT_EMBEDDED_CONTEXT = 0b1000;
    }
}

impl Serialize for AgentCapabilities {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Prompt {
            image: bool,
            audio: bool,
            embedded_context: bool,
        }

        let mut state = serializer.serialize_struct("AgentCapabilities", 2)?;
        state.serialize_field("loadSession", &self.contains(Self::LOAD_SESSION))?;
        state.serialize_field(
            "promptCapabilities",
            &Prompt {
                image: self.contains(Self::PROMPT_IMAGE),
                audio: self.contains(Self::PROMPT_AUDIO),
                embedded_context: self.contains(Self::PROMPT_EMBEDDED_CONTEXT),
            },
        )?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for AgentCapabilities {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Prompt {
            image: bool,
            audio: bool,
            embedded_context: bool,
        }

        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Helper {
            load_session: bool,
            prompt_capabilities: Prompt,
        }

        let h = Helper::deserialize(deserializer)?;
        let mut caps = Self::empty();
        caps.set(Self::LOAD_SESSION, h.load_session);
        caps.set(Self::PROMPT_IMAGE, h.prompt_capabilities.image);
        caps.set(Self::PROMPT_AUDIO, h.prompt_capabilities.audio);
        caps.set(
            Self::PROMPT_EMBEDDED_CONTEXT,
            h.prompt_capabilities.embedded_context,
        );
        Ok(caps)
    }
}

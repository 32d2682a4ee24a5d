use std::collections::HashMap;

use crate::{
    descriptor::{
        EnumDescriptor, EnumIndex, FileDescriptor, FileIndex, MessageDescriptor, MessageIndex,
    },
    error::RegistryError,
};

/// A named type in the registry's global namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Message(MessageIndex),
    Enum(EnumIndex),
}

/// The compiled descriptor graph: every file, message and enum of a schema
/// tree, addressed by path, full name or index.
///
/// A `Registry` has no mutating methods. It is assembled once through a
/// [`RegistryBuilder`] and can then be shared freely between threads.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    files:         Vec<FileDescriptor>,
    file_by_name:  HashMap<String, FileIndex>,
    messages:      Vec<MessageDescriptor>,
    enums:         Vec<EnumDescriptor>,
    symbols:       HashMap<String, Symbol>,
}

impl Registry {
    /// Looks up a file by the import-relative path it was compiled under.
    pub fn file(&self, name: &str) -> Option<&FileDescriptor> {
        self.file_by_name.get(name).map(|&index| self.file_at(index))
    }

    pub fn file_index(&self, name: &str) -> Option<FileIndex> {
        self.file_by_name.get(name).copied()
    }

    pub fn file_at(&self, index: FileIndex) -> &FileDescriptor {
        &self.files[index.index()]
    }

    pub fn files(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn message(&self, index: MessageIndex) -> &MessageDescriptor {
        &self.messages[index.index()]
    }

    pub fn get_enum(&self, index: EnumIndex) -> &EnumDescriptor {
        &self.enums[index.index()]
    }

    pub fn messages(&self) -> impl Iterator<Item = (MessageIndex, &MessageDescriptor)> {
        self.messages
            .iter()
            .enumerate()
            .map(|(i, m)| (MessageIndex(i as u32), m))
    }

    /// Resolves a fully qualified name (without a leading dot).
    pub fn find_symbol(&self, full_name: &str) -> Option<Symbol> {
        self.symbols.get(full_name).copied()
    }

    /// Finds a message declared in `file`. `name` is joined to the file's
    /// package with a `.`, so `"Outer.Inner"` addresses a nested message. A
    /// leading `.` marks `name` as already fully qualified.
    pub fn find_message(&self, file: &FileDescriptor, name: &str) -> Option<MessageIndex> {
        let full_name = match name.strip_prefix('.') {
            Some(qualified) => qualified.to_owned(),
            None if file.package.is_empty() => name.to_owned(),
            None => format!("{}.{}", file.package, name),
        };

        match self.find_symbol(&full_name)? {
            Symbol::Message(index) => {
                let owner = self.file_at(self.message(index).file);
                (owner.name == file.name).then_some(index)
            }
            Symbol::Enum(_) => None,
        }
    }
}

/// Mutable staging area for a [`Registry`]. Messages and enums are added
/// first and filled in later, so forward and cyclic references can be
/// expressed by index before their targets are complete.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    pub fn new() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn add_file(&mut self, file: FileDescriptor) -> Result<FileIndex, RegistryError> {
        if self.registry.file_by_name.contains_key(&file.name) {
            return Err(RegistryError::DuplicateFile(file.name));
        }
        let index = FileIndex(self.registry.files.len() as u32);
        self.registry.file_by_name.insert(file.name.clone(), index);
        self.registry.files.push(file);
        Ok(index)
    }

    pub fn add_message(&mut self, message: MessageDescriptor) -> Result<MessageIndex, RegistryError> {
        if self.registry.symbols.contains_key(&message.full_name) {
            return Err(RegistryError::DuplicateSymbol(message.full_name));
        }
        let index = MessageIndex(self.registry.messages.len() as u32);
        self.registry
            .symbols
            .insert(message.full_name.clone(), Symbol::Message(index));
        self.registry.messages.push(message);
        Ok(index)
    }

    pub fn add_enum(&mut self, descriptor: EnumDescriptor) -> Result<EnumIndex, RegistryError> {
        if self.registry.symbols.contains_key(&descriptor.full_name) {
            return Err(RegistryError::DuplicateSymbol(descriptor.full_name));
        }
        let index = EnumIndex(self.registry.enums.len() as u32);
        self.registry
            .symbols
            .insert(descriptor.full_name.clone(), Symbol::Enum(index));
        self.registry.enums.push(descriptor);
        Ok(index)
    }

    pub fn file_mut(&mut self, index: FileIndex) -> &mut FileDescriptor {
        &mut self.registry.files[index.index()]
    }

    pub fn message_mut(&mut self, index: MessageIndex) -> &mut MessageDescriptor {
        &mut self.registry.messages[index.index()]
    }

    pub fn enum_mut(&mut self, index: EnumIndex) -> &mut EnumDescriptor {
        &mut self.registry.enums[index.index()]
    }

    /// Read access to everything added so far.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Seals the registry.
    pub fn build(mut self) -> Registry {
        for message in &mut self.registry.messages {
            message.index_fields();
        }
        self.registry
    }
}

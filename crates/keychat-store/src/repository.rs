//! The persistence surface the client engines are written against.

use crate::database::Database;
use crate::error::Result;
use crate::models::{Contact, Conversation, PersonaRecord, StoredMessage};

/// Storage used by the pairing and delivery engines.
///
/// `message_exists` followed by `insert_message` is not atomic across
/// callers; implementations must reject a second insert of the same id so a
/// racing duplicate fails instead of being stored twice.
pub trait ChatRepository: Send + Sync {
    fn get_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation>;
    fn touch_conversation(&self, id: &str, last_msg: &str, timestamp: i64) -> Result<()>;
    fn list_conversations(&self) -> Result<Vec<Conversation>>;

    fn insert_message(&self, message: &StoredMessage) -> Result<()>;
    fn message_exists(&self, id: &str) -> Result<bool>;
    fn messages_for_conversation(&self, conversation: &Conversation) -> Result<Vec<StoredMessage>>;

    fn save_contact(&self, contact: &Contact) -> Result<()>;
    fn find_contact(&self, uri: &str) -> Result<Option<Contact>>;
    fn list_contacts(&self) -> Result<Vec<Contact>>;
    fn rename_contact(&self, uri: &str, name: &str, sub_name: &str) -> Result<()>;
    fn delete_contact(&self, uri: &str) -> Result<bool>;

    fn upsert_persona(&self, persona: &PersonaRecord) -> Result<()>;
}

impl ChatRepository for Database {
    fn get_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation> {
        Database::get_or_create_conversation(self, a, b)
    }

    fn touch_conversation(&self, id: &str, last_msg: &str, timestamp: i64) -> Result<()> {
        Database::touch_conversation(self, id, last_msg, timestamp)
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Database::list_conversations(self)
    }

    fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        Database::insert_message(self, message)
    }

    fn message_exists(&self, id: &str) -> Result<bool> {
        Database::message_exists(self, id)
    }

    fn messages_for_conversation(&self, conversation: &Conversation) -> Result<Vec<StoredMessage>> {
        Database::messages_for_conversation(self, conversation)
    }

    fn save_contact(&self, contact: &Contact) -> Result<()> {
        Database::save_contact(self, contact)
    }

    fn find_contact(&self, uri: &str) -> Result<Option<Contact>> {
        Database::find_contact(self, uri)
    }

    fn list_contacts(&self) -> Result<Vec<Contact>> {
        Database::list_contacts(self)
    }

    fn rename_contact(&self, uri: &str, name: &str, sub_name: &str) -> Result<()> {
        Database::rename_contact(self, uri, name, sub_name)
    }

    fn delete_contact(&self, uri: &str) -> Result<bool> {
        Database::delete_contact(self, uri)
    }

    fn upsert_persona(&self, persona: &PersonaRecord) -> Result<()> {
        Database::upsert_persona(self, persona)
    }
}

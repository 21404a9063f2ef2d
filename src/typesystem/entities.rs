//! Token-keyed entity storage shared between worker threads.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    typesystem::{Entity, Field, Method, Property, Token},
    Error, Result,
};

/// Maps tokens to resolved entities.
///
/// Functions are decompiled in parallel and all of them resolve calls through
/// the same table, so every access goes through a single mutex. Lookups are
/// short and uncontended in practice.
#[derive(Debug, Default)]
pub struct EntityTable {
    entries: Mutex<HashMap<Token, Entity>>,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entity` under its own token, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the mutex was poisoned.
    pub fn insert(&self, entity: Entity) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::LockError)?;
        entries.insert(entity.token(), entity);
        Ok(())
    }

    /// Looks up the entity stored under `token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the mutex was poisoned.
    pub fn get(&self, token: Token) -> Result<Option<Entity>> {
        let entries = self.entries.lock().map_err(|_| Error::LockError)?;
        Ok(entries.get(&token).cloned())
    }

    /// Looks up a method by token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the mutex was poisoned.
    pub fn method(&self, token: Token) -> Result<Option<Arc<Method>>> {
        Ok(match self.get(token)? {
            Some(Entity::Method(method)) => Some(method),
            _ => None,
        })
    }

    /// Looks up a method that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeNotFound`] if no method is stored under `token`, or
    /// [`Error::LockError`] if the mutex was poisoned.
    pub fn require_method(&self, token: Token) -> Result<Arc<Method>> {
        self.method(token)?.ok_or(Error::TypeNotFound(token))
    }

    /// Looks up a property by token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the mutex was poisoned.
    pub fn property(&self, token: Token) -> Result<Option<Arc<Property>>> {
        Ok(match self.get(token)? {
            Some(Entity::Property(property)) => Some(property),
            _ => None,
        })
    }

    /// Looks up a field by token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the mutex was poisoned.
    pub fn field(&self, token: Token) -> Result<Option<Arc<Field>>> {
        Ok(match self.get(token)? {
            Some(Entity::Field(field)) => Some(field),
            _ => None,
        })
    }

    /// Number of stored entities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the mutex was poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().map_err(|_| Error::LockError)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesystem::Type;
    use std::thread;

    fn field(row: u32) -> Entity {
        Entity::Field(Arc::new(Field {
            token: Token::from_parts(Token::FIELD, row),
            name: format!("f{}", row),
            declaring_type: Type::Unknown,
            ty: Type::INT32,
            is_static: false,
        }))
    }

    #[test]
    fn test_insert_and_lookup_by_kind() {
        let table = EntityTable::new();
        table.insert(field(1)).unwrap();

        let token = Token::from_parts(Token::FIELD, 1);
        assert_eq!(table.field(token).unwrap().unwrap().name, "f1");
        assert!(table.method(token).unwrap().is_none());
        assert_eq!(table.len().unwrap(), 1);
    }

    #[test]
    fn test_require_method_reports_missing_token() {
        let table = EntityTable::new();
        let token = Token::from_parts(Token::METHOD_DEF, 9);
        assert!(matches!(
            table.require_method(token),
            Err(Error::TypeNotFound(t)) if t == token
        ));
    }

    #[test]
    fn test_concurrent_inserts() {
        let table = Arc::new(EntityTable::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.insert(field(i)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.len().unwrap(), 8);
    }

    #[test]
    fn test_poisoned_lock_reports_error() {
        let table = Arc::new(EntityTable::new());
        let clone = Arc::clone(&table);
        let _ = thread::spawn(move || {
            let _guard = clone.entries.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(matches!(table.insert(field(1)), Err(Error::LockError)));
    }
}

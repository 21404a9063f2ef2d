//! Entity resolution interface and an in-memory implementation.

use std::sync::Arc;

use crate::{
    typesystem::{
        Entity, EntityTable, Field, Method, MethodReference, Property, Token, Type,
    },
    Result,
};

/// Name of the method implementing `System.IDisposable`.
pub const DISPOSE_METHOD_NAME: &str = "Dispose";

/// Resolves method references and answers type-hierarchy questions.
///
/// Implementations are shared across worker threads and must be `Send + Sync`.
/// All queries are infallible from the caller's point of view: an entity that
/// cannot be resolved is reported as `None`, and transforms that need it
/// simply do not fire.
pub trait TypeSystem: Send + Sync {
    /// Resolves a method reference to its definition.
    fn resolve_method(&self, method: &MethodReference) -> Option<Arc<Method>>;

    /// Resolves a property by token.
    fn resolve_property(&self, token: Token) -> Option<Arc<Property>>;

    /// All direct and transitive base types and interfaces of `ty`, excluding `ty` itself.
    fn base_types(&self, ty: &Type) -> Vec<Type>;

    /// Returns `true` if `ty` is or implements `System.IDisposable`.
    fn is_disposable(&self, ty: &Type) -> bool {
        ty.is_disposable_interface() || self.base_types(ty).iter().any(Type::is_disposable_interface)
    }

    /// Returns `true` if `method` is `System.IDisposable.Dispose()`.
    fn is_dispose_method(&self, method: &MethodReference) -> bool {
        method.declaring_type.is_disposable_interface()
            && method.name == DISPOSE_METHOD_NAME
            && method.signature.parameters.is_empty()
    }

    /// Returns `true` if a value of type `from` can be used where `to` is expected
    /// through a reference conversion.
    fn is_subtype(&self, from: &Type, to: &Type) -> bool {
        from == to || self.base_types(from).contains(to)
    }

    /// If `method` is a property accessor, returns the resolved method and its property.
    fn accessor_property(&self, method: &MethodReference) -> Option<(Arc<Method>, Arc<Property>)> {
        let resolved = self.resolve_method(method)?;
        let property = self.resolve_property(resolved.accessor_owner?)?;
        Some((resolved, property))
    }
}

/// A [`TypeSystem`] backed by an [`EntityTable`].
///
/// Used by tests, benchmarks and hosts that populate entities up front.
#[derive(Debug, Default)]
pub struct SimpleTypeSystem {
    entities: EntityTable,
}

impl SimpleTypeSystem {
    /// Creates an empty type system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method definition and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the entity table was poisoned.
    pub fn add_method(&self, method: Method) -> Result<Arc<Method>> {
        let method = Arc::new(method);
        self.entities.insert(Entity::Method(Arc::clone(&method)))?;
        Ok(method)
    }

    /// Registers a property definition and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the entity table was poisoned.
    pub fn add_property(&self, property: Property) -> Result<Arc<Property>> {
        let property = Arc::new(property);
        self.entities.insert(Entity::Property(Arc::clone(&property)))?;
        Ok(property)
    }

    /// Registers a field definition and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the entity table was poisoned.
    pub fn add_field(&self, field: Field) -> Result<Arc<Field>> {
        let field = Arc::new(field);
        self.entities.insert(Entity::Field(Arc::clone(&field)))?;
        Ok(field)
    }

    /// The backing entity table.
    #[must_use]
    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }
}

impl TypeSystem for SimpleTypeSystem {
    fn resolve_method(&self, method: &MethodReference) -> Option<Arc<Method>> {
        match self.entities.method(method.token) {
            Ok(resolved) => resolved,
            Err(e) => {
                log::warn!("resolving {} failed: {}", method.full_name(), e);
                None
            }
        }
    }

    fn resolve_property(&self, token: Token) -> Option<Arc<Property>> {
        match self.entities.property(token) {
            Ok(resolved) => resolved,
            Err(e) => {
                log::warn!("resolving property {} failed: {}", token, e);
                None
            }
        }
    }

    fn base_types(&self, ty: &Type) -> Vec<Type> {
        let mut result: Vec<Type> = Vec::new();
        let mut pending: Vec<Type> = match ty {
            Type::Definition(def) => def.base_types.clone(),
            _ => Vec::new(),
        };
        while let Some(next) = pending.pop() {
            if result.contains(&next) {
                continue;
            }
            if let Type::Definition(def) = &next {
                pending.extend(def.base_types.iter().cloned());
            }
            result.push(next);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesystem::{TypeKind, DISPOSABLE_NAME, DISPOSABLE_NAMESPACE};

    fn disposable() -> Type {
        Type::definition(
            Token::from_parts(Token::TYPE_DEF, 1),
            DISPOSABLE_NAMESPACE,
            DISPOSABLE_NAME,
            TypeKind::Interface,
            vec![],
        )
    }

    #[test]
    fn test_transitive_disposable() {
        let ts = SimpleTypeSystem::new();
        let base = Type::definition(
            Token::from_parts(Token::TYPE_DEF, 2),
            "App",
            "Base",
            TypeKind::Class,
            vec![disposable()],
        );
        let derived = Type::definition(
            Token::from_parts(Token::TYPE_DEF, 3),
            "App",
            "Derived",
            TypeKind::Class,
            vec![base.clone()],
        );

        assert!(ts.is_disposable(&derived));
        assert!(ts.is_subtype(&derived, &base));
        assert!(!ts.is_disposable(&Type::INT32));
    }

    #[test]
    fn test_dispose_method_shape() {
        let ts = SimpleTypeSystem::new();
        let dispose = MethodReference::new(
            Token::from_parts(Token::METHOD_DEF, 1),
            disposable(),
            "Dispose",
            true,
            vec![],
            Type::Void,
        );
        assert!(ts.is_dispose_method(&dispose));

        let mut overload = dispose.clone();
        overload.signature.parameters.push(Type::BOOLEAN);
        assert!(!ts.is_dispose_method(&overload));
    }

    #[test]
    fn test_accessor_property() {
        let ts = SimpleTypeSystem::new();
        let prop_token = Token::from_parts(Token::PROPERTY, 1);
        let getter_token = Token::from_parts(Token::METHOD_DEF, 9);
        ts.add_method(Method {
            token: getter_token,
            name: "get_Count".into(),
            declaring_type: Type::Unknown,
            parameters: vec![],
            return_type: Type::INT32,
            is_static: false,
            accessor_owner: Some(prop_token),
        })
        .unwrap();
        ts.add_property(Property {
            token: prop_token,
            name: "Count".into(),
            declaring_type: Type::Unknown,
            ty: Type::INT32,
            getter: Some(getter_token),
            setter: None,
        })
        .unwrap();

        let reference =
            MethodReference::new(getter_token, Type::Unknown, "get_Count", true, vec![], Type::INT32);
        let (_, property) = ts.accessor_property(&reference).unwrap();
        assert_eq!(property.name, "Count");
    }
}

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::backends::{ExecutionBackend, InMemoryBackend};
use crate::error::QueryResult;
use crate::expr::{EntityPath, TypedExpr};
use crate::hydration::EntityRecord;
use crate::query::QueryFactory;
use crate::registry::{
    AttributeDescriptor, EntityDescriptor, EntityRegistry, RelationDescriptor, ScalarKind,
};
use crate::value::Value;

static REGISTRY: OnceCell<Arc<EntityRegistry>> = OnceCell::new();

fn member() -> EntityDescriptor {
    EntityDescriptor::new("Member", "member")
        .attribute(AttributeDescriptor::new("id", ScalarKind::Int))
        .attribute(AttributeDescriptor::new("username", ScalarKind::Text).nullable())
        .attribute(AttributeDescriptor::new("age", ScalarKind::Int))
        .attribute(AttributeDescriptor::new("team_id", ScalarKind::Int).nullable())
        .relation(RelationDescriptor::to_one("team", "Team", "team_id"))
}

fn team() -> EntityDescriptor {
    EntityDescriptor::new("Team", "team")
        .attribute(AttributeDescriptor::new("id", ScalarKind::Int))
        .attribute(AttributeDescriptor::new("name", ScalarKind::Text))
        .relation(RelationDescriptor::to_many_inverse("members", "Member", "team"))
}

/// The shared Member/Team registry, built on first use
pub fn registry() -> QueryResult<Arc<EntityRegistry>> {
    REGISTRY
        .get_or_try_init(|| {
            EntityRegistry::builder()
                .entity(member())
                .entity(team())
                .build()
                .map(Arc::new)
        })
        .cloned()
}

/// Two teams with two members each:
/// teamA has member1 (10) and member2 (20), teamB has member3 (30) and member4 (40).
pub fn seed(backend: &InMemoryBackend) -> QueryResult<()> {
    let team_a = backend.persist("Team", [("name", Value::from("teamA"))])?;
    let team_b = backend.persist("Team", [("name", Value::from("teamB"))])?;

    for (username, age, team) in [
        ("member1", 10, &team_a),
        ("member2", 20, &team_a),
        ("member3", 30, &team_b),
        ("member4", 40, &team_b),
    ] {
        backend.persist(
            "Member",
            [
                ("username", Value::from(username)),
                ("age", Value::from(age)),
                ("team_id", team.clone()),
            ],
        )?;
    }

    tracing::debug!("Seeded {} members", backend.row_count("Member"));
    Ok(())
}

/// Member lookups built on the query builder
#[derive(Debug, Clone)]
pub struct MemberRepository {
    factory: QueryFactory,
    member: EntityPath,
    id: TypedExpr<i64>,
    username: TypedExpr<String>,
}

impl MemberRepository {
    pub fn new(factory: QueryFactory) -> QueryResult<Self> {
        let member = factory.registry().path("Member")?;
        let id = member.attr::<i64>("id")?;
        let username = member.attr::<String>("username")?;
        Ok(Self {
            factory,
            member,
            id,
            username,
        })
    }

    pub async fn find_all<B>(&self, backend: &B) -> QueryResult<Vec<EntityRecord>>
    where
        B: ExecutionBackend + ?Sized,
    {
        self.factory.select_from(&self.member).fetch_list(backend).await
    }

    pub async fn find_by_id<B>(&self, backend: &B, id: i64) -> QueryResult<Option<EntityRecord>>
    where
        B: ExecutionBackend + ?Sized,
    {
        self.factory
            .select_from(&self.member)
            .filter(self.id.eq(id))?
            .fetch_one(backend)
            .await
    }

    pub async fn find_by_username<B>(
        &self,
        backend: &B,
        username: &str,
    ) -> QueryResult<Vec<EntityRecord>>
    where
        B: ExecutionBackend + ?Sized,
    {
        self.factory
            .select_from(&self.member)
            .filter(self.username.eq(username))?
            .fetch_list(backend)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_shared() {
        let first = registry().unwrap();
        let second = registry().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.entity_names(), vec!["Member", "Team"]);
    }

    #[tokio::test]
    async fn test_repository_lookups() {
        let backend = InMemoryBackend::new(registry().unwrap());
        seed(&backend).unwrap();
        let repository = MemberRepository::new(QueryFactory::new(registry().unwrap())).unwrap();

        assert_eq!(repository.find_all(&backend).await.unwrap().len(), 4);

        let found = repository.find_by_username(&backend, "member3").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_as::<i64>("age").unwrap(), Some(30));

        let by_id = repository.find_by_id(&backend, 3).await.unwrap().unwrap();
        assert_eq!(by_id.get_as::<String>("username").unwrap(), Some("member1".to_string()));
        assert!(repository.find_by_id(&backend, 999).await.unwrap().is_none());

        assert!(repository
            .find_by_username(&backend, "nobody")
            .await
            .unwrap()
            .is_empty());
    }
}

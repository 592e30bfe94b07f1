use sea_orm::DatabaseConnection;
use thiserror::Error;

use crate::{
    entity::prelude::*,
    error::QueryError,
    ids::UserId,
    query::{crud, FindMany},
    service::password::{self, PasswordError},
};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum UsersServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("user not found")]
    UserNotFound,

    #[error("username already taken")]
    UsernameTaken,

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<DbErr> for UsersServiceError {
    fn from(err: DbErr) -> Self {
        Self::Query(err.into())
    }
}

fn normalize_email(email: &str) -> Result<String, UsersServiceError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(UsersServiceError::InvalidInput(format!("not an email address: {email}"))),
    }
}

fn check_password(password: &str) -> Result<(), UsersServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(UsersServiceError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct UsersService {
    db: DatabaseConnection,
}

impl UsersService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Creates an account with an argon2-hashed password and the default role.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserModel, UsersServiceError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(UsersServiceError::InvalidInput("username is empty".into()));
        }
        if username.contains('@') {
            return Err(UsersServiceError::InvalidInput("username may not contain '@'".into()));
        }
        let email = normalize_email(email)?;
        check_password(password)?;

        let users = crud::<User, _>(&self.db);
        if users
            .find_unique(Condition::all().add(UserColumn::Username.eq(username)))
            .await?
            .is_some()
        {
            return Err(UsersServiceError::UsernameTaken);
        }
        if users
            .find_unique(Condition::all().add(UserColumn::Email.eq(email.as_str())))
            .await?
            .is_some()
        {
            return Err(UsersServiceError::EmailTaken);
        }

        let created = users
            .create(UserActiveModel {
                username: Set(username.to_string()),
                email: Set(email),
                password_hash: Set(password::hash_password(password)?),
                ..Default::default()
            })
            .await
            .map_err(|err| match err {
                // Lost a race with a concurrent registration.
                QueryError::UniqueViolation(msg) if msg.contains("email") => {
                    UsersServiceError::EmailTaken
                }
                QueryError::UniqueViolation(_) => UsersServiceError::UsernameTaken,
                other => other.into(),
            })?;

        tracing::info!(user_id = %created.user_id, username = %created.username, "registered user");
        Ok(created)
    }

    /// `login` may be the username or the email address; anything with an
    /// `@` is treated as an email.
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<UserModel, UsersServiceError> {
        let login = login.trim();
        let by_login = if login.contains('@') {
            Condition::all().add(UserColumn::Email.eq(login.to_lowercase()))
        } else {
            Condition::all().add(UserColumn::Username.eq(login))
        };
        let user = crud::<User, _>(&self.db).find_unique(by_login).await?;

        let Some(user) = user else {
            tracing::debug!(login, "authentication failed: unknown login");
            return Err(UsersServiceError::InvalidCredentials);
        };

        if password::verify_password(password, &user.password_hash)? {
            Ok(user)
        } else {
            tracing::debug!(user_id = %user.user_id, "authentication failed: wrong password");
            Err(UsersServiceError::InvalidCredentials)
        }
    }

    pub async fn get(&self, user_id: UserId) -> Result<UserModel, UsersServiceError> {
        crud::<User, _>(&self.db)
            .find_by_id(user_id)
            .await?
            .ok_or(UsersServiceError::UserNotFound)
    }

    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserModel>, UsersServiceError> {
        Ok(crud::<User, _>(&self.db)
            .find_unique(Condition::all().add(UserColumn::Username.eq(username.trim())))
            .await?)
    }

    pub async fn update_email(
        &self,
        user_id: UserId,
        email: &str,
    ) -> Result<UserModel, UsersServiceError> {
        let email = normalize_email(email)?;
        crud::<User, _>(&self.db)
            .update(
                Condition::all().add(UserColumn::UserId.eq(user_id)),
                UserActiveModel {
                    email: Set(email),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => UsersServiceError::UserNotFound,
                QueryError::UniqueViolation(_) => UsersServiceError::EmailTaken,
                other => other.into(),
            })
    }

    /// Requires the current password.
    pub async fn change_password(
        &self,
        user_id: UserId,
        current: &str,
        new: &str,
    ) -> Result<(), UsersServiceError> {
        let user = self.get(user_id).await?;
        if !password::verify_password(current, &user.password_hash)? {
            return Err(UsersServiceError::InvalidCredentials);
        }
        check_password(new)?;

        let mut active = user.into_active_model();
        active.password_hash = Set(password::hash_password(new)?);
        active.update(&self.db).await?;

        tracing::info!(%user_id, "password changed");
        Ok(())
    }

    pub async fn set_role(
        &self,
        user_id: UserId,
        role: UserRole,
    ) -> Result<UserModel, UsersServiceError> {
        let user = crud::<User, _>(&self.db)
            .update(
                Condition::all().add(UserColumn::UserId.eq(user_id)),
                UserActiveModel {
                    role: Set(role),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => UsersServiceError::UserNotFound,
                other => other.into(),
            })?;

        tracing::info!(%user_id, ?role, "role changed");
        Ok(user)
    }

    /// Users ordered by join date, oldest first.
    pub async fn list(&self, page: u64, per_page: u64) -> Result<Vec<UserModel>, UsersServiceError> {
        Ok(crud::<User, _>(&self.db)
            .find_many(
                FindMany::new()
                    .order_by_asc(UserColumn::DateJoined)
                    .order_by_asc(UserColumn::Username)
                    .page(page, per_page),
            )
            .await?)
    }

    /// Removes the account together with its recipes, collections and reviews.
    pub async fn delete(&self, user_id: UserId) -> Result<(), UsersServiceError> {
        crud::<User, _>(&self.db)
            .delete(Condition::all().add(UserColumn::UserId.eq(user_id)))
            .await
            .map_err(|err| match err {
                QueryError::NotFound(_) => UsersServiceError::UserNotFound,
                other => other.into(),
            })?;

        tracing::info!(%user_id, "deleted user");
        Ok(())
    }
}

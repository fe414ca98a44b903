use std::time::Duration;

use padel_core::auth::{AuthBackend, SignUpOutcome};
use padel_core::session::SessionStore;
use padel_core::Identity;

use crate::auth::{clear_stored_session, load_stored_session};
use crate::cli::AuthCommands;
use crate::commands::common::{open_context, resolve_client_config};
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        AuthCommands::Signup { email, password } => {
            let context = open_context(global_profile)?;
            match sign_up(context.backend, &email, &password).await? {
                SignUpOutcome::SignedIn(identity) => println!(
                    "Signed up profile '{}' as {}",
                    context.profile_name,
                    identity.email_label()
                ),
                SignUpOutcome::ConfirmationRequired => {
                    println!("Check your email to confirm the account, then run `padel auth login`.");
                }
            }
            Ok(())
        }
        AuthCommands::Login { email, password } => {
            let context = open_context(global_profile)?;
            let identity = sign_in(context.backend, &email, &password).await?;
            println!(
                "Signed in profile '{}' as {}",
                context.profile_name,
                identity.email_label()
            );
            Ok(())
        }
        AuthCommands::Oauth {
            provider,
            redirect_to,
        } => {
            let context = open_context(global_profile)?;
            let url = context
                .backend
                .sign_in_with_oauth(provider.into(), redirect_to.as_deref())
                .map_err(|error| CliError::Auth(error.to_string()))?;
            println!("{url}");
            Ok(())
        }
        AuthCommands::Status => {
            let context = match open_context(global_profile) {
                Ok(context) => context,
                Err(CliError::Config(message)) => {
                    println!("{message}");
                    return Ok(());
                }
                Err(error) => return Err(error),
            };
            let session = context
                .backend
                .auth_client()
                .restore_session()
                .await
                .map_err(|error| CliError::Auth(error.to_string()))?;
            if let Some(session) = session {
                println!(
                    "Profile '{}' is signed in as {} (expires_at={})",
                    context.profile_name,
                    session.user.email_label(),
                    session.expires_at
                );
            } else {
                println!("Profile '{}' is not signed in.", context.profile_name);
            }
            Ok(())
        }
        AuthCommands::Logout => {
            let (profile_name, _) = resolve_client_config(global_profile)?;
            let stored_session = load_stored_session(&profile_name)
                .map_err(|error| CliError::Auth(error.to_string()))?;
            if stored_session.is_some() {
                let context = open_context(global_profile)?;
                context
                    .backend
                    .sign_out()
                    .await
                    .map_err(|error| CliError::Auth(error.to_string()))?;
            }
            clear_stored_session(&profile_name)
                .map_err(|error| CliError::Auth(error.to_string()))?;
            println!("Signed out profile '{profile_name}'");
            Ok(())
        }
    }
}

const SESSION_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sign up through a session store; a `SignedIn` outcome is returned once
/// the store reports the new identity.
pub async fn sign_up<A: AuthBackend>(
    backend: A,
    email: &str,
    password: &str,
) -> Result<SignUpOutcome, CliError> {
    let session = SessionStore::start(backend);
    let outcome = session
        .sign_up(email, password)
        .await
        .map_err(|error| CliError::Auth(error.to_string()))?;
    match outcome {
        SignUpOutcome::SignedIn(_) => {
            let identity = signed_in_identity(&session).await?;
            Ok(SignUpOutcome::SignedIn(identity))
        }
        SignUpOutcome::ConfirmationRequired => Ok(SignUpOutcome::ConfirmationRequired),
    }
}

pub async fn sign_in<A: AuthBackend>(
    backend: A,
    email: &str,
    password: &str,
) -> Result<Identity, CliError> {
    let session = SessionStore::start(backend);
    session
        .sign_in(email, password)
        .await
        .map_err(|error| CliError::Auth(error.to_string()))?;
    signed_in_identity(&session).await
}

async fn signed_in_identity<A: AuthBackend>(
    session: &SessionStore<A>,
) -> Result<Identity, CliError> {
    let mut state = session.subscribe();
    let settled = tokio::time::timeout(
        SESSION_SETTLE_TIMEOUT,
        state.wait_for(|state| state.identity.is_some()),
    )
    .await;
    let identity = match settled {
        Ok(Ok(state)) => state.identity.clone(),
        _ => session.identity(),
    };
    identity.ok_or_else(|| {
        CliError::Auth("Sign-in succeeded but no session was reported".to_string())
    })
}

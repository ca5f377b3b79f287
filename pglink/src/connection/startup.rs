//! Startup phase.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use super::{
    Config,
    auth::{AuthError, SCRAM_SHA_256, ScramSha256, md5_password},
};
use crate::{
    Result,
    common::verbose,
    postgres::{
        BackendMessage, ProtocolError,
        backend::{self, Authentication},
        frontend,
    },
    transport::{PgTransport, PgTransportExt},
};

/// Perform startup handshake.
///
/// Returns the cancellation key data, if the backend sent one.
pub(crate) async fn startup<IO: PgTransport>(config: &Config, mut io: IO) -> Result<Option<backend::BackendKeyData>> {
    verbose!(user = config.user(), database = config.dbname(), "startup");

    // To begin a session, a frontend opens a connection to the server and sends a startup message.

    let params = config.startup_params();
    io.send_startup(frontend::Startup {
        user: config.user(),
        database: Some(config.dbname()),
        params: &params,
    });
    io.flush().await?;

    // The server then sends an appropriate authentication request message,
    // to which the frontend must reply with an appropriate authentication response message.
    //
    // For SASL, multiple exchanges of packets may be needed to complete the authentication.

    loop {
        use Authentication::*;
        match io.recv().await? {
            Ok => break,
            CleartextPassword => {
                let password = password(config)?;
                io.send(frontend::PasswordMessage { password });
                io.flush().await?;
            },
            MD5Password { salt } => {
                let password = md5_password(config.user(), password(config)?, salt);
                io.send(frontend::PasswordMessage { password: &password });
                io.flush().await?;
            },
            auth @ SASL { .. } => {
                if !auth.sasl_mechanisms().any(|e| e == SCRAM_SHA_256.as_bytes()) {
                    Err(AuthError::Unsupported("SASL mechanisms other than SCRAM-SHA-256"))?
                }
                scram(config, &mut io).await?;
            },
            KerberosV5 => Err(AuthError::Unsupported("KerberosV5"))?,
            GSS | GSSContinue { .. } => Err(AuthError::Unsupported("GSSAPI"))?,
            SSPI => Err(AuthError::Unsupported("SSPI"))?,
            SASLContinue { .. } | SASLFinal { .. } => {
                Err(ProtocolError::malformed("SASL message outside of SASL exchange"))?
            },
        }
    }

    // After having received AuthenticationOk, the frontend must wait for further messages from the server.
    // The backend will send some ParameterStatus messages, BackendKeyData, and finally ReadyForQuery.
    //
    // ParameterStatus is recorded by the transport.

    let mut key_data = None;

    loop {
        use BackendMessage::*;
        match io.recv().await? {
            ReadyForQuery(_) => break,
            BackendKeyData(new_key_data) => key_data = Some(new_key_data),
            NegotiateProtocolVersion(_) => { },
            f => Err(ProtocolError::unexpected_phase(f.msgtype(), "startup"))?,
        }
    }

    Ok(key_data)
}

fn password(config: &Config) -> Result<&str, AuthError> {
    config.password().ok_or(AuthError::MissingPassword)
}

async fn scram<IO: PgTransport>(config: &Config, io: &mut IO) -> Result<()> {
    let mut scram = ScramSha256::new(password(config)?);

    io.send(frontend::SaslInitialResponse {
        mechanism: SCRAM_SHA_256,
        data: &scram.client_first(),
    });
    io.flush().await?;

    let server_first = match io.recv().await? {
        Authentication::SASLContinue { data } => data,
        _ => Err(AuthError::Scram("expected server-first-message"))?,
    };

    let client_final = scram.client_final(&server_first)?;
    io.send(frontend::SaslResponse { data: &client_final });
    io.flush().await?;

    let server_final = match io.recv().await? {
        Authentication::SASLFinal { data } => data,
        _ => Err(AuthError::Scram("expected server-final-message"))?,
    };

    scram.verify(&server_final)?;

    Ok(())
}

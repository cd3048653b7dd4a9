/*!
Mock shell pour tests sans SSH ni processus réels

Remplace `ShellChannelFactory`: chaque canal ouvert partage le même état, enregistre
toutes les requêtes envoyées et répond selon des règles préparées par le test.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use warden_core::{
    ChannelFactory, CommandChannel, CommandOutput, Host, Result, ShellRequest, WardenError,
};

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    ConnectionLost,
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    reply: Reply,
}

#[derive(Default)]
struct ShellState {
    rules: Vec<Rule>,
    starter_outputs: VecDeque<String>,
    executed: Vec<ShellRequest>,
    opened: Vec<String>,
    closed: usize,
    refuse_connections: bool,
    failing_close: bool,
    strict_exit: bool,
}

/// Shell scriptée, clonable, partagée entre la factory et les assertions du test
#[derive(Clone, Default)]
pub struct MockShell {
    state: Arc<Mutex<ShellState>>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les commandes commençant par `prefix` impriment `stdout`
    pub fn respond(&self, prefix: &str, stdout: &str) -> &Self {
        self.rule(
            prefix,
            Reply::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_status: 0,
            }),
        )
    }

    /// Les commandes commençant par `prefix` écrivent sur stderr
    pub fn fail(&self, prefix: &str, stderr: &str, exit_status: i32) -> &Self {
        self.rule(
            prefix,
            Reply::Output(CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_status,
            }),
        )
    }

    /// La session tombe pendant les commandes commençant par `prefix`
    pub fn lose_connection(&self, prefix: &str) -> &Self {
        self.rule(prefix, Reply::ConnectionLost)
    }

    /// Prochaine sortie du script de démarrage (vide = aucun pid)
    pub fn queue_starter_output(&self, stdout: &str) -> &Self {
        self.state.lock().starter_outputs.push_back(stdout.to_string());
        self
    }

    pub fn refuse_connections(&self, refuse: bool) -> &Self {
        self.state.lock().refuse_connections = refuse;
        self
    }

    /// La fermeture du canal échoue (session déjà coupée côté hôte)
    pub fn failing_close(&self, failing: bool) -> &Self {
        self.state.lock().failing_close = failing;
        self
    }

    /// Comportement d'un shell local: un exit status non nul échoue
    pub fn strict_exit(&self, strict: bool) -> &Self {
        self.state.lock().strict_exit = strict;
        self
    }

    fn rule(&self, prefix: &str, reply: Reply) -> &Self {
        // la dernière règle posée l'emporte
        self.state.lock().rules.insert(
            0,
            Rule {
                prefix: prefix.to_string(),
                reply,
            },
        );
        self
    }

    /// Toutes les requêtes, dans l'ordre d'envoi
    pub fn executed(&self) -> Vec<ShellRequest> {
        self.state.lock().executed.clone()
    }

    /// Lignes de commande simples uniquement (sans les scripts)
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .filter_map(|r| match r {
                ShellRequest::Command(c) => Some(c.clone()),
                ShellRequest::Script(_) => None,
            })
            .collect()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .filter_map(|r| match r {
                ShellRequest::Script(s) => Some(s.clone()),
                ShellRequest::Command(_) => None,
            })
            .collect()
    }

    /// Ids des hôtes pour lesquels un canal a été ouvert
    pub fn opened_hosts(&self) -> Vec<String> {
        self.state.lock().opened.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    fn answer(&self, address: &str, request: ShellRequest) -> Result<CommandOutput> {
        let mut state = self.state.lock();
        log::info!("[MOCK] {} <- {:?}", address, request);
        let reply = match &request {
            ShellRequest::Command(command) => state
                .rules
                .iter()
                .find(|rule| command.starts_with(&rule.prefix))
                .map(|rule| rule.reply.clone())
                .unwrap_or_else(|| Reply::Output(CommandOutput::default())),
            ShellRequest::Script(_) => Reply::Output(CommandOutput {
                stdout: state.starter_outputs.pop_front().unwrap_or_default(),
                ..CommandOutput::default()
            }),
        };
        state.executed.push(request);
        match reply {
            Reply::Output(output) => Ok(output),
            Reply::ConnectionLost => Err(WardenError::connection(address, "connection reset by peer")),
        }
    }
}

/// Canal transitoire rendu par [`MockChannelFactory`]
pub struct MockChannel {
    shell: MockShell,
    address: String,
    closed: bool,
}

#[async_trait]
impl CommandChannel for MockChannel {
    async fn run(&mut self, request: ShellRequest) -> Result<CommandOutput> {
        if self.closed {
            return Err(WardenError::connection(&self.address, "channel already closed"));
        }
        self.shell.answer(&self.address, request)
    }

    fn strict_exit(&self) -> bool {
        self.shell.state.lock().strict_exit
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.shell.state.lock();
        state.closed += 1;
        if state.failing_close {
            return Err(WardenError::connection(&self.address, "disconnect failed"));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockChannelFactory {
    shell: MockShell,
}

impl MockChannelFactory {
    pub fn new(shell: MockShell) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl ChannelFactory for MockChannelFactory {
    async fn open(&self, host: &Host) -> Result<Box<dyn CommandChannel>> {
        {
            let mut state = self.shell.state.lock();
            if state.refuse_connections {
                return Err(WardenError::connection(&host.address, "connection refused"));
            }
            state.opened.push(host.id.clone());
        }
        Ok(Box::new(MockChannel {
            shell: self.shell.clone(),
            address: host.address.clone(),
            closed: false,
        }))
    }
}

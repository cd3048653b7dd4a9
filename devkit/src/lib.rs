/*!
# Warden DevKit - Stubs et utilitaires de test

Permet d'exercer les contrôleurs warden-core sans SSH, sans hôte réel et sans base:
- Shell mockée qui enregistre chaque commande et répond selon des règles
- Gateway en mémoire (statuts + historiques)
- Prober scripté pour l'attente post-reboot
- Fixtures et harness de test
*/

pub mod fixtures;
pub mod memory_gateway;
pub mod prober_stub;
pub mod shell_stub;
pub mod test_utils;

pub use memory_gateway::InMemoryGateway;
pub use prober_stub::{ScriptedOutcome, ScriptedProber};
pub use shell_stub::{MockChannel, MockChannelFactory, MockShell};
pub use test_utils::TestHarness;

//! Conversation model and turn-taking engine
//!
//! A `Conversation` is an immutable-append record of one dialogue between a
//! testee and the reference conversation partner, plus a cursor for whose
//! turn it is. The `ConversationEngine` drives a conversation to completion:
//! optional synthetic opener, starter assignment, then exactly
//! `2 × conv_length` alternating live turns so each participant produces
//! `conv_length` replies.
//!
//! Turn production calls the current owner's `act` with the stringified
//! history so far; ownership then flips to the other participant. A turn can
//! alternatively be satisfied by injection (transcript replay), which skips
//! the `act` call but still records id/role and advances the cursor.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::agent::{AgentError, AgentRole, ConvAgent};
use crate::error::EngineError;

pub mod transcript;

pub use transcript::{parse_transcript, serialize_conversation, TranscriptWriter};

/// One utterance in a conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The utterance text
    pub text: String,

    /// Id of the agent that produced it
    pub agent_id: String,

    /// Role of the producer at the time of production
    pub role: AgentRole,
}

impl Message {
    pub fn new(text: impl Into<String>, agent_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            text: text.into(),
            agent_id: agent_id.into(),
            role,
        }
    }
}

/// Which of the two live participants owns the next turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Testee,
    Partner,
}

impl Speaker {
    fn other(self) -> Self {
        match self {
            Speaker::Testee => Speaker::Partner,
            Speaker::Partner => Speaker::Testee,
        }
    }
}

/// Who takes the first live turn of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StarterPolicy {
    /// The testee opens
    Testee,

    /// The conversation partner opens
    Partner,

    /// Unbiased coin flip per conversation
    #[default]
    CoinFlip,
}

impl StarterPolicy {
    /// Parse the configured override string; empty means coin flip.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_lowercase().as_str() {
            "" => Ok(StarterPolicy::CoinFlip),
            "testee" => Ok(StarterPolicy::Testee),
            "conv_partner" => Ok(StarterPolicy::Partner),
            other => Err(EngineError::Config(format!(
                "Invalid conv_starter '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StarterPolicy::Testee => "testee",
            StarterPolicy::Partner => "conv_partner",
            StarterPolicy::CoinFlip => "",
        }
    }
}

/// A coherence scoring pair: one testee reply and the message it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoherencePair {
    /// The message preceding the testee's reply
    pub previous: String,

    /// The testee's reply
    pub reply: String,
}

/// Ordered record of one dialogue plus the turn cursor
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    whose_turn: Speaker,
    testee_id: String,
    partner_id: String,
}

impl Conversation {
    pub fn new(testee_id: impl Into<String>, partner_id: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            whose_turn: Speaker::Testee,
            testee_id: testee_id.into(),
            partner_id: partner_id.into(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn testee_id(&self) -> &str {
        &self.testee_id
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    pub fn whose_turn(&self) -> Speaker {
        self.whose_turn
    }

    pub fn set_turn(&mut self, speaker: Speaker) {
        self.whose_turn = speaker;
    }

    /// Append a message without advancing the cursor (openers).
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Record an injected turn: appends the message and advances the cursor,
    /// without any live `act` call.
    pub fn inject_message(
        &mut self,
        text: impl Into<String>,
        agent_id: impl Into<String>,
        role: AgentRole,
    ) {
        self.messages.push(Message::new(text, agent_id, role));
        if matches!(role, AgentRole::Testee | AgentRole::OtherAgent) {
            self.switch_turn();
        }
    }

    /// Flip turn ownership to the participant that did not produce the last
    /// reply.
    pub fn switch_turn(&mut self) {
        self.whose_turn = self.whose_turn.other();
    }

    /// The full history as plain strings, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.text.clone()).collect()
    }

    /// All message texts produced by one role.
    pub fn filter_msgs(&self, role: AgentRole) -> Vec<String> {
        self.messages
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.text.clone())
            .collect()
    }

    /// For every testee message, the message it replies to.
    ///
    /// The normal rule is positional lookback: the reply at index `i` pairs
    /// with the message at `i - 1`. When the testee produced the very first
    /// message there is no predecessor, and pairing switches to roles for
    /// the whole conversation: the k-th testee message pairs with the k-th
    /// partner-role message. Testee messages beyond the last partner
    /// message yield no pair.
    pub fn testee_pairs(&self) -> Vec<CoherencePair> {
        if self.messages.first().map_or(false, |m| m.role.is_testee()) {
            return self
                .filter_msgs(AgentRole::Testee)
                .into_iter()
                .zip(self.filter_msgs(AgentRole::OtherAgent))
                .map(|(reply, previous)| CoherencePair { previous, reply })
                .collect();
        }
        let mut pairs = Vec::new();
        for (i, message) in self.messages.iter().enumerate() {
            if !message.role.is_testee() {
                continue;
            }
            // The first message is not the testee's, so i >= 1 here.
            pairs.push(CoherencePair {
                previous: self.messages[i - 1].text.clone(),
                reply: message.text.clone(),
            });
        }
        pairs
    }
}

/// Policy inputs for driving one conversation
#[derive(Debug, Clone)]
pub struct ConversationPolicy {
    /// Replies per participant
    pub conv_length: u32,

    /// Generate a synthetic opening message
    pub random_conv_start: bool,

    /// Open with an interview question; the partner then takes the first
    /// live turn
    pub interview_mode: bool,

    /// First-turn assignment
    pub starter: StarterPolicy,

    /// Per-turn agent call timeout
    pub act_timeout: Duration,
}

/// Drives one conversation between two borrowed agents to completion.
pub struct ConversationEngine<'a> {
    testee: &'a dyn ConvAgent,
    partner: &'a dyn ConvAgent,
    policy: ConversationPolicy,
}

impl<'a> ConversationEngine<'a> {
    pub fn new(
        testee: &'a dyn ConvAgent,
        partner: &'a dyn ConvAgent,
        policy: ConversationPolicy,
    ) -> Self {
        Self {
            testee,
            partner,
            policy,
        }
    }

    /// Run the conversation to its terminal state, logging every message to
    /// the transcript writer as it is produced. `opener` is the synthetic
    /// opening message, already generated per the start policy (None when
    /// opening is disabled).
    pub async fn run(
        &self,
        opener: Option<Message>,
        writer: &mut TranscriptWriter,
    ) -> Result<Conversation, EngineError> {
        let mut conv = Conversation::new(self.testee.id(), self.partner.id());

        if let Some(opener) = opener {
            debug!(role = %opener.role, text = %opener.text, "conversation opener");
            writer.write_message(&opener)?;
            conv.push(opener);
        }

        conv.set_turn(self.first_turn());

        for turn in 0..(2 * self.policy.conv_length) {
            let speaker = match conv.whose_turn() {
                Speaker::Testee => self.testee,
                Speaker::Partner => self.partner,
            };

            let history = conv.history();
            let reply = match tokio::time::timeout(self.policy.act_timeout, speaker.act(&history))
                .await
            {
                Ok(reply) => reply?,
                Err(_) => {
                    tracing::error!(turn, agent = speaker.id(), "agent call timed out");
                    return Err(EngineError::Agent(AgentError::Timeout));
                }
            };

            let message = Message::new(reply, speaker.id(), speaker.role());
            debug!(turn, role = %message.role, text = %message.text, "turn produced");
            writer.write_message(&message)?;
            conv.push(message);
            conv.switch_turn();
        }

        writer.end_conversation()?;
        Ok(conv)
    }

    /// Resolve who takes the first live turn. Interview mode always hands it
    /// to the reference partner.
    fn first_turn(&self) -> Speaker {
        if self.policy.interview_mode {
            return Speaker::Partner;
        }
        match self.policy.starter {
            StarterPolicy::Testee => Speaker::Testee,
            StarterPolicy::Partner => Speaker::Partner,
            StarterPolicy::CoinFlip => {
                if rand::thread_rng().gen_bool(0.5) {
                    Speaker::Testee
                } else {
                    Speaker::Partner
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic agent replying with numbered lines.
    struct ScriptedAgent {
        id: String,
        role: AgentRole,
        counter: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedAgent {
        fn new(id: &str, role: AgentRole) -> Self {
            Self {
                id: id.to_string(),
                role,
                counter: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConvAgent for ScriptedAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn role(&self) -> AgentRole {
            self.role
        }

        async fn act(&self, history: &[String]) -> crate::agent::Result<String> {
            let n = self
                .counter
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(format!("{} reply {} (saw {})", self.id, n, history.len()))
        }
    }

    fn policy(conv_length: u32, starter: StarterPolicy) -> ConversationPolicy {
        ConversationPolicy {
            conv_length,
            random_conv_start: false,
            interview_mode: false,
            starter,
            act_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn runs_exact_turn_budget() {
        let testee = ScriptedAgent::new("testee-model", AgentRole::Testee);
        let partner = ScriptedAgent::new("partner-model", AgentRole::OtherAgent);
        let engine = ConversationEngine::new(&testee, &partner, policy(3, StarterPolicy::Testee));
        let mut writer = TranscriptWriter::discard();

        let conv = engine.run(None, &mut writer).await.unwrap();
        assert_eq!(conv.len(), 6);
        assert_eq!(conv.filter_msgs(AgentRole::Testee).len(), 3);
        assert_eq!(conv.filter_msgs(AgentRole::OtherAgent).len(), 3);
    }

    #[tokio::test]
    async fn turns_strictly_alternate() {
        let testee = ScriptedAgent::new("testee-model", AgentRole::Testee);
        let partner = ScriptedAgent::new("partner-model", AgentRole::OtherAgent);
        let engine = ConversationEngine::new(&testee, &partner, policy(4, StarterPolicy::Partner));
        let mut writer = TranscriptWriter::discard();

        let conv = engine.run(None, &mut writer).await.unwrap();
        let messages = conv.messages();
        assert_eq!(messages[0].role, AgentRole::OtherAgent);
        for pair in messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
    }

    #[tokio::test]
    async fn opener_adds_one_message_before_turns() {
        let testee = ScriptedAgent::new("testee-model", AgentRole::Testee);
        let partner = ScriptedAgent::new("partner-model", AgentRole::OtherAgent);
        let engine = ConversationEngine::new(&testee, &partner, policy(2, StarterPolicy::Testee));
        let mut writer = TranscriptWriter::discard();

        let opener = Message::new("Nice weather today", "generator", AgentRole::Generator);
        let conv = engine.run(Some(opener), &mut writer).await.unwrap();
        assert_eq!(conv.len(), 2 * 2 + 1);
        assert_eq!(conv.messages()[0].role, AgentRole::Generator);
        assert_eq!(conv.messages()[1].role, AgentRole::Testee);
    }

    #[tokio::test]
    async fn interview_mode_gives_partner_first_turn() {
        let testee = ScriptedAgent::new("testee-model", AgentRole::Testee);
        let partner = ScriptedAgent::new("partner-model", AgentRole::OtherAgent);
        let mut p = policy(2, StarterPolicy::Testee);
        p.interview_mode = true;
        let engine = ConversationEngine::new(&testee, &partner, p);
        let mut writer = TranscriptWriter::discard();

        let question = Message::new(
            "Tell me about yourself?",
            "question_generator",
            AgentRole::QuestionGenerator,
        );
        let conv = engine.run(Some(question), &mut writer).await.unwrap();
        assert_eq!(conv.messages()[1].role, AgentRole::OtherAgent);
    }

    #[tokio::test]
    async fn hung_agent_surfaces_timeout() {
        struct HungAgent;

        #[async_trait]
        impl ConvAgent for HungAgent {
            fn id(&self) -> &str {
                "hung"
            }
            fn role(&self) -> AgentRole {
                AgentRole::Testee
            }
            async fn act(&self, _history: &[String]) -> crate::agent::Result<String> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }

        let testee = HungAgent;
        let partner = ScriptedAgent::new("partner-model", AgentRole::OtherAgent);
        let mut p = policy(1, StarterPolicy::Testee);
        p.act_timeout = Duration::from_millis(20);
        let engine = ConversationEngine::new(&testee, &partner, p);
        let mut writer = TranscriptWriter::discard();

        let err = engine.run(None, &mut writer).await.unwrap_err();
        assert!(matches!(err, EngineError::Agent(AgentError::Timeout)));
    }

    #[test]
    fn testee_pairs_use_positional_lookback() {
        let mut conv = Conversation::new("t", "p");
        conv.push(Message::new("opener", "generator", AgentRole::Generator));
        conv.push(Message::new("t1", "t", AgentRole::Testee));
        conv.push(Message::new("p1", "p", AgentRole::OtherAgent));
        conv.push(Message::new("t2", "t", AgentRole::Testee));

        let pairs = conv.testee_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].previous, "opener");
        assert_eq!(pairs[0].reply, "t1");
        assert_eq!(pairs[1].previous, "p1");
        assert_eq!(pairs[1].reply, "t2");
    }

    #[test]
    fn testee_first_turn_pairs_by_role() {
        // No opener, testee speaks first: the whole conversation pairs by
        // role, k-th reply against the k-th partner message.
        let mut conv = Conversation::new("t", "p");
        conv.push(Message::new("t1", "t", AgentRole::Testee));
        conv.push(Message::new("p1", "p", AgentRole::OtherAgent));
        conv.push(Message::new("t2", "t", AgentRole::Testee));
        conv.push(Message::new("p2", "p", AgentRole::OtherAgent));

        let pairs = conv.testee_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].previous, "p1");
        assert_eq!(pairs[0].reply, "t1");
        assert_eq!(pairs[1].previous, "p2");
        assert_eq!(pairs[1].reply, "t2");
    }

    #[test]
    fn testee_overhang_yields_no_pair() {
        let mut conv = Conversation::new("t", "p");
        conv.push(Message::new("t1", "t", AgentRole::Testee));
        conv.push(Message::new("p1", "p", AgentRole::OtherAgent));
        conv.push(Message::new("t2", "t", AgentRole::Testee));

        let pairs = conv.testee_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].previous, "p1");
        assert_eq!(pairs[0].reply, "t1");
    }

    #[test]
    fn injected_turns_advance_the_cursor() {
        let mut conv = Conversation::new("t", "p");
        conv.set_turn(Speaker::Testee);

        conv.inject_message("replayed opener", "generator", AgentRole::Generator);
        // Opener roles never own a turn
        assert_eq!(conv.whose_turn(), Speaker::Testee);

        conv.inject_message("replayed reply", "t", AgentRole::Testee);
        assert_eq!(conv.whose_turn(), Speaker::Partner);
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn starter_policy_parses_overrides() {
        assert_eq!(StarterPolicy::parse("").unwrap(), StarterPolicy::CoinFlip);
        assert_eq!(
            StarterPolicy::parse("Testee").unwrap(),
            StarterPolicy::Testee
        );
        assert_eq!(
            StarterPolicy::parse("conv_partner").unwrap(),
            StarterPolicy::Partner
        );
        assert!(StarterPolicy::parse("referee").is_err());
    }
}

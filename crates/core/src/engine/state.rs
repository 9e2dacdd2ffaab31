use chatline_model::{ModelProviderError, ReplyKind};
use tokio::sync::{oneshot, watch};

use super::SubmitError;
use super::mailbox::{Command, Mailbox};
use crate::model_client::{
    ModelClient, ProviderCrashed, SendRequestResult,
};
use crate::transcript::{Change, Transcript, Turn};

pub(crate) type ChangeFn = Box<dyn Fn(&Change, &Transcript) + Send + Sync>;
pub(crate) type NotifyFn = Box<dyn Fn() + Send + Sync>;

/// The reply currently being waited for.
struct InFlight {
    submission: u64,
    // Index of the assistant turn built from this reply, once the first
    // non-empty fragment has arrived.
    assistant_idx: Option<usize>,
}

pub(crate) struct EngineState {
    pub(super) model_client: ModelClient,
    pub(super) transcript: Transcript,
    pub(super) pending_tx: watch::Sender<bool>,
    pub(super) on_change: Option<ChangeFn>,
    pub(super) on_clear_draft: Option<NotifyFn>,
    pub(super) on_settled: Option<NotifyFn>,
    in_flight: Option<InFlight>,
    next_submission: u64,
}

impl EngineState {
    pub(super) fn new(
        model_client: ModelClient,
        pending_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            model_client,
            transcript: Default::default(),
            pending_tx,
            on_change: None,
            on_clear_draft: None,
            on_settled: None,
            in_flight: None,
            next_submission: 1,
        }
    }

    fn submit(
        &mut self,
        text: String,
        mailbox: &Mailbox,
    ) -> Result<(), SubmitError> {
        if text.trim().is_empty() {
            trace!("ignoring empty input");
            return Err(SubmitError::EmptyInput);
        }
        if mailbox.is_detached() {
            warn!("rejecting input posted after the engine was dropped");
            return Err(SubmitError::EngineStopped);
        }
        if self.in_flight.is_some() {
            warn!("rejecting input while a reply is pending");
            return Err(SubmitError::Busy);
        }

        let idx = self.transcript.push(Turn::user(text));
        self.notify(Change::Appended(idx));

        let submission = self.next_submission;
        self.next_submission += 1;
        self.in_flight = Some(InFlight {
            submission,
            assistant_idx: None,
        });
        self.pending_tx.send_replace(true);

        let request = self.transcript.to_request();
        debug!(
            "dispatching submission {submission} with {} messages",
            request.messages.len()
        );
        let model_client = self.model_client.clone();
        let mailbox = mailbox.clone();
        tokio::spawn(async move {
            let fragment_mailbox = mailbox.clone();
            // The provider runs in its own task, so that a panic in it
            // still settles the submission.
            let reply_task = tokio::spawn(async move {
                model_client
                    .send_request(request, move |fragment| {
                        fragment_mailbox
                            .post(FragmentReceived {
                                submission,
                                fragment,
                            })
                            .ok();
                    })
                    .await
            });
            let result = match reply_task.await {
                Ok(result) => result,
                Err(err) => {
                    error!("reply task of submission {submission} died: {err}");
                    let err: Box<dyn ModelProviderError> =
                        Box::new(ProviderCrashed);
                    Err(err)
                }
            };
            mailbox.post(ReplySettled { submission, result }).ok();
        });

        // Streaming replies let the user compose the next message while
        // the fragments arrive.
        if self.model_client.reply_kind() == ReplyKind::Streaming {
            self.clear_draft();
        }
        Ok(())
    }

    fn merge_fragment(&mut self, submission: u64, fragment: String) {
        let Some(in_flight) = self
            .in_flight
            .as_mut()
            .filter(|f| f.submission == submission)
        else {
            warn!("discarding a fragment of settled submission {submission}");
            return;
        };
        if fragment.is_empty() {
            trace!("skipping an empty fragment");
            return;
        }

        let change = match in_flight.assistant_idx {
            Some(idx) => {
                if !self.transcript.extend(idx, &fragment) {
                    warn!("turn {idx} refused a fragment");
                    return;
                }
                Change::Extended(idx)
            }
            None => {
                let idx = self.transcript.push(Turn::assistant(fragment));
                in_flight.assistant_idx = Some(idx);
                Change::Appended(idx)
            }
        };
        self.notify(change);
    }

    fn settle(&mut self, submission: u64, result: SendRequestResult) {
        let Some(in_flight) =
            self.in_flight.take_if(|f| f.submission == submission)
        else {
            warn!("discarding the reply of settled submission {submission}");
            return;
        };

        let idx = match (result, in_flight.assistant_idx) {
            (Ok(resp), Some(idx)) => {
                debug!(
                    "submission {submission} streamed {} fragments ({:?})",
                    resp.fragments, resp.finish_reason
                );
                idx
            }
            (Ok(resp), None) => {
                // Whole replies, and streamed replies made only of empty
                // fragments, still produce exactly one assistant turn.
                let idx = self.transcript.push(Turn::assistant(resp.text));
                self.notify(Change::Appended(idx));
                idx
            }
            (Err(err), Some(idx)) => {
                error!("submission {submission} failed mid-stream: {err}");
                let message = format!("\n\n{}", error_message(&*err));
                if self.transcript.extend(idx, &message) {
                    self.notify(Change::Extended(idx));
                }
                idx
            }
            (Err(err), None) => {
                error!("submission {submission} failed: {err}");
                let turn = Turn::assistant(error_message(&*err));
                let idx = self.transcript.push(turn);
                self.notify(Change::Appended(idx));
                idx
            }
        };

        self.transcript.freeze(idx);
        self.notify(Change::Frozen(idx));
        debug_assert!(self.transcript.roles_alternate());

        if self.model_client.reply_kind() == ReplyKind::Whole {
            self.clear_draft();
        }
        // Last, the UI may send again as soon as it sees this.
        self.pending_tx.send_replace(false);
        debug!("submission {submission} settled");
        if let Some(on_settled) = &self.on_settled {
            on_settled();
        }
    }

    fn notify(&self, change: Change) {
        if let Some(on_change) = &self.on_change {
            on_change(&change, &self.transcript);
        }
    }

    fn clear_draft(&self) {
        if let Some(on_clear_draft) = &self.on_clear_draft {
            on_clear_draft();
        }
    }
}

/// Builds the text shown in place of a reply that failed.
fn error_message(err: &dyn ModelProviderError) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        return "Error: Unable to communicate with the AI.".to_owned();
    }
    format!("Error: {message}")
}

#[derive(Debug)]
pub(crate) struct Submit {
    pub text: String,
    pub ack: oneshot::Sender<Result<(), SubmitError>>,
}

impl Command for Submit {
    fn apply(self: Box<Self>, state: &mut EngineState, mailbox: &Mailbox) {
        let Submit { text, ack } = *self;
        let result = state.submit(text, mailbox);
        ack.send(result).ok();
    }
}

#[derive(Debug)]
pub(crate) struct FragmentReceived {
    pub submission: u64,
    pub fragment: String,
}

impl Command for FragmentReceived {
    #[inline]
    fn apply(self: Box<Self>, state: &mut EngineState, _mailbox: &Mailbox) {
        state.merge_fragment(self.submission, self.fragment);
    }
}

#[derive(Debug)]
pub(crate) struct ReplySettled {
    pub submission: u64,
    pub result: SendRequestResult,
}

impl Command for ReplySettled {
    #[inline]
    fn apply(self: Box<Self>, state: &mut EngineState, _mailbox: &Mailbox) {
        state.settle(self.submission, self.result);
    }
}

#[derive(Debug)]
pub(crate) struct TakeSnapshot(pub oneshot::Sender<Transcript>);

impl Command for TakeSnapshot {
    #[inline]
    fn apply(self: Box<Self>, state: &mut EngineState, _mailbox: &Mailbox) {
        self.0.send(state.transcript.clone()).ok();
    }
}

//! Classification of model-call failures.
//!
//! The loop does not decide on its own how to react to a failed model call.
//! [`classify`] maps the error to a [`Recovery`] and the loop carries it out,
//! asking the sink when a human has to choose.

use codeloop_core::error::{Error, ProviderError};

use crate::respond::Outcome;

const KEY_HELP: &str = "There might be an issue with your API key(s).

To reset your API key (OPENAI_API_KEY is used here, but you may need to reset another provider's key, or CODELOOP_API_KEY):
    Mac/Linux: 'export OPENAI_API_KEY=your-key-here'. Update your ~/.zshrc or ~/.bashrc with the new key if it has already been persisted there.
    Windows: 'setx OPENAI_API_KEY your-key-here' then restart the terminal.";

const QUOTA_NOTICE: &str = "> You ran out of current quota for the API, please check your plan and billing details. You can either wait for the quota to reset or upgrade your plan.

To check your current usage and billing details, visit your provider's billing page (for OpenAI: https://platform.openai.com/settings/organization/billing/overview).

You can also use `codeloop chat --max-budget [USD amount]` to set a budget for your sessions.";

/// What the loop should do about a failed model call.
#[derive(Debug)]
pub enum Recovery {
    /// Show `notice` and end the reply with `outcome`
    Stop { notice: String, outcome: Outcome },

    /// Ask `question`; on yes switch to `model` and retry, on no fail
    SwitchModel { question: String, model: String },

    /// Give up; the error reaches the caller
    Fail(Error),
}

/// Map a provider error to a recovery.
///
/// `offline` sessions talk to a local model, so hosted-provider advice
/// (keys, model access) does not apply to them.
pub fn classify(err: &ProviderError, model: &str, fallback_model: &str, offline: bool) -> Recovery {
    let text = err.to_string().to_lowercase();

    if let ProviderError::BudgetExceeded { spent_usd, max_usd } = err {
        return Recovery::Stop {
            notice: budget_notice(*spent_usd, *max_usd),
            outcome: Outcome::BudgetExceeded,
        };
    }

    let auth = matches!(err, ProviderError::AuthenticationFailed(_))
        || text.contains("auth")
        || text.contains("api key");
    if !offline && auth {
        return Recovery::Fail(Error::ProviderHelp {
            source: err.clone(),
            help: KEY_HELP.into(),
        });
    }

    if let ProviderError::RateLimited { message } = err {
        let message = message.to_lowercase();
        if message.contains("exceeded") || message.contains("insufficient_quota") {
            return Recovery::Stop {
                notice: QUOTA_NOTICE.into(),
                outcome: Outcome::QuotaExhausted,
            };
        }
    }

    let no_access = matches!(
        err,
        ProviderError::AccessDenied(_) | ProviderError::ModelNotFound(_)
    ) || text.contains("not have access");
    if !offline && no_access && model != fallback_model {
        return Recovery::SwitchModel {
            question: switch_question(err, &text, model, fallback_model),
            model: fallback_model.to_string(),
        };
    }

    Recovery::Fail(Error::Provider(err.clone()))
}

fn budget_notice(spent_usd: f64, max_usd: f64) -> String {
    format!(
        "> Max budget exceeded\n\n**Session spend:** ${spent_usd:.4}\n**Max budget:** ${max_usd}\n\nPress CTRL-C then run `codeloop chat --max-budget [higher USD amount]` to proceed."
    )
}

fn switch_question(err: &ProviderError, text: &str, model: &str, fallback: &str) -> String {
    let reason = if matches!(err, ProviderError::ModelNotFound(_))
        || text.contains("invalid model")
        || text.contains("model does not exist")
    {
        format!(
            "The model '{model}' does not exist or is invalid. Please check the model name and try again."
        )
    } else if text.contains("groq") {
        format!("You do not have access to {model}. Please check with Groq for more details.")
    } else {
        format!(
            "You do not have access to {model}. If you are using an OpenAI model, you may need to add a payment method and purchase credits on the OpenAI API billing page (this is different from ChatGPT Plus).\n\nhttps://platform.openai.com/account/billing/overview"
        )
    };
    format!("{reason}\n\nWould you like to try the `{fallback}` model instead? (y/n)")
}

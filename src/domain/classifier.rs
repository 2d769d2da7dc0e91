//! Reply Classification
//!
//! Maps the execution agent's free-text replies onto trade signals. The
//! agent speaks a mix of Chinese and English with no structured fields,
//! so classification is substring matching over a configurable vocabulary
//! plus regex extraction of contract addresses and transaction hashes.

use regex::Regex;
use serde::Deserialize;

/// A phrase rule: the signal fires when `any` of the phrases appears, or
/// when every phrase in `all` appears together.
#[derive(Debug, Clone, Deserialize)]
pub struct PhraseRule {
    #[serde(default)]
    pub any: Vec<String>,
    #[serde(default)]
    pub all: Vec<String>,
}

impl PhraseRule {
    fn matches(&self, lowered: &str) -> bool {
        if self
            .any
            .iter()
            .any(|p| lowered.contains(p.to_lowercase().as_str()))
        {
            return true;
        }
        !self.all.is_empty()
            && self
                .all
                .iter()
                .all(|p| lowered.contains(p.to_lowercase().as_str()))
    }
}

/// The phrases the agent uses for each outcome. Swappable so a different
/// agent (or a reworded one) only needs new vocabulary, not new code.
#[derive(Debug, Clone, Deserialize)]
pub struct Vocabulary {
    pub buy_success: Vec<PhraseRule>,
    pub sell_success: Vec<PhraseRule>,
    pub failure: Vec<PhraseRule>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            buy_success: vec![
                PhraseRule {
                    any: vec!["已成功买入".into(), "successfully bought".into()],
                    all: vec![],
                },
                PhraseRule {
                    any: vec![],
                    all: vec!["交易成功".into(), "买入".into()],
                },
            ],
            sell_success: vec![
                PhraseRule {
                    any: vec!["已成功卖出".into(), "successfully sold".into()],
                    all: vec![],
                },
                PhraseRule {
                    any: vec![],
                    all: vec!["交易成功".into(), "卖出".into()],
                },
            ],
            failure: vec![PhraseRule {
                any: vec!["链上交易失败".into(), "滑点不够".into()],
                all: vec![],
            }],
        }
    }
}

/// Outcome of classifying one agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeSignal {
    BuyConfirmed { contract: Option<String> },
    SellConfirmed { contract: Option<String> },
    TradeFailed,
    Unrecognized,
}

#[derive(Debug)]
pub struct SignalClassifier {
    vocab: Vocabulary,
    // Matches 0x followed by 40 to 64 hex chars; the run length then
    // distinguishes a contract address (42) from a tx hash (66). A plain
    // 40-char pattern would also match the leading slice of a tx hash.
    hex_run: Regex,
    tx_url: Regex,
    tx_near_scanner: Regex,
}

impl SignalClassifier {
    pub fn new(vocab: Vocabulary) -> Result<Self, regex::Error> {
        Ok(Self {
            vocab,
            hex_run: Regex::new(r"0x[a-fA-F0-9]{40,64}")?,
            tx_url: Regex::new(r"bscscan\.com/tx/(0x[a-fA-F0-9]{64})")?,
            tx_near_scanner: Regex::new(r"bscscan.*?(0x[a-fA-F0-9]{64})")?,
        })
    }

    /// Classify a reply. Failure phrases are checked between the two
    /// success families so that a success message mentioning slippage in
    /// passing still reads as a success.
    pub fn classify(&self, text: &str) -> TradeSignal {
        let lowered = text.to_lowercase();

        if self.vocab.buy_success.iter().any(|r| r.matches(&lowered)) {
            return TradeSignal::BuyConfirmed {
                contract: self.extract_contract(text),
            };
        }
        if self.vocab.failure.iter().any(|r| r.matches(&lowered)) {
            return TradeSignal::TradeFailed;
        }
        if self.vocab.sell_success.iter().any(|r| r.matches(&lowered)) {
            return TradeSignal::SellConfirmed {
                contract: self.extract_contract(text),
            };
        }
        TradeSignal::Unrecognized
    }

    /// First 42-char hex address in the text, if any. Longer runs are tx
    /// hashes, not addresses, and are skipped.
    pub fn extract_contract(&self, text: &str) -> Option<String> {
        self.hex_run
            .find_iter(text)
            .map(|m| m.as_str())
            .find(|s| s.len() == 42)
            .map(|s| s.to_string())
    }

    /// Transaction hash from the message body or its embedded link URLs.
    /// Tries the explorer URL form first, then a hash near a scanner
    /// mention, then any bare 66-char run.
    pub fn extract_tx_hash(&self, text: &str, entity_urls: &[String]) -> Option<String> {
        for url in entity_urls {
            if let Some(caps) = self.tx_url.captures(url) {
                return Some(caps[1].to_string());
            }
        }
        if let Some(caps) = self.tx_url.captures(text) {
            return Some(caps[1].to_string());
        }
        if let Some(caps) = self.tx_near_scanner.captures(&text.to_lowercase()) {
            return Some(caps[1].to_string());
        }
        self.hex_run
            .find_iter(text)
            .map(|m| m.as_str())
            .find(|s| s.len() == 66)
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &str = "0x1111111111111111111111111111111111112222";
    const TX: &str = "0x5555555555555555555555555555555555555555555555555555555555556666";

    fn classifier() -> SignalClassifier {
        SignalClassifier::new(Vocabulary::default()).unwrap()
    }

    #[test]
    fn test_chinese_buy_success_with_contract() {
        let signal = classifier().classify(&format!("已成功买入 {}", CA));
        assert_eq!(
            signal,
            TradeSignal::BuyConfirmed {
                contract: Some(CA.to_string())
            }
        );
    }

    #[test]
    fn test_english_buy_success() {
        let signal = classifier().classify(&format!("Successfully bought token {}", CA));
        assert_eq!(
            signal,
            TradeSignal::BuyConfirmed {
                contract: Some(CA.to_string())
            }
        );
    }

    #[test]
    fn test_combined_phrase_requires_both_parts() {
        let c = classifier();
        assert_eq!(
            c.classify("交易成功: 买入完成"),
            TradeSignal::BuyConfirmed { contract: None }
        );
        // "交易成功" alone matches neither the buy nor the sell rule.
        assert_eq!(c.classify("交易成功"), TradeSignal::Unrecognized);
    }

    #[test]
    fn test_slippage_failure() {
        assert_eq!(classifier().classify("滑点不够"), TradeSignal::TradeFailed);
    }

    #[test]
    fn test_onchain_failure() {
        assert_eq!(
            classifier().classify("链上交易失败，请重试"),
            TradeSignal::TradeFailed
        );
    }

    #[test]
    fn test_sell_success() {
        let signal = classifier().classify(&format!("已成功卖出 {}", CA));
        assert_eq!(
            signal,
            TradeSignal::SellConfirmed {
                contract: Some(CA.to_string())
            }
        );
    }

    #[test]
    fn test_unrecognized_text() {
        assert_eq!(
            classifier().classify("gm, market looking good today"),
            TradeSignal::Unrecognized
        );
    }

    #[test]
    fn test_tx_hash_not_mistaken_for_contract() {
        let c = classifier();
        let text = format!("已成功买入, tx: {}", TX);
        assert_eq!(c.classify(&text), TradeSignal::BuyConfirmed { contract: None });
        assert_eq!(c.extract_tx_hash(&text, &[]), Some(TX.to_string()));
    }

    #[test]
    fn test_tx_hash_from_entity_url() {
        let urls = vec![format!("https://bscscan.com/tx/{}", TX)];
        assert_eq!(
            classifier().extract_tx_hash("已成功买入", &urls),
            Some(TX.to_string())
        );
    }

    #[test]
    fn test_tx_hash_near_scanner_mention() {
        let text = format!("已成功买入, see bscscan for details {}", TX);
        assert_eq!(classifier().extract_tx_hash(&text, &[]), Some(TX.to_string()));
    }

    #[test]
    fn test_custom_vocabulary() {
        let vocab = Vocabulary {
            buy_success: vec![PhraseRule {
                any: vec!["filled: buy".into()],
                all: vec![],
            }],
            sell_success: vec![PhraseRule {
                any: vec!["filled: sell".into()],
                all: vec![],
            }],
            failure: vec![PhraseRule {
                any: vec!["order rejected".into()],
                all: vec![],
            }],
        };
        let c = SignalClassifier::new(vocab).unwrap();
        assert_eq!(
            c.classify(&format!("FILLED: BUY {}", CA)),
            TradeSignal::BuyConfirmed {
                contract: Some(CA.to_string())
            }
        );
        assert_eq!(c.classify("order rejected"), TradeSignal::TradeFailed);
        assert_eq!(c.classify("已成功买入"), TradeSignal::Unrecognized);
    }
}

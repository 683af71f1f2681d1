//! Ring-Buffer zwischen Netzwerk-Produzent und Render-Callback
//!
//! Feste Kapazitaet, keine Groessenaenderung, keine Fehlerfaelle:
//! - `push` ueberschreibt bei Ueberlauf die aeltesten ungelesenen Samples
//! - `pop` liefert genau `n` Samples oder nichts, nie einen Teil

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

/// Sample-Speicher fester Kapazitaet mit Ueberschreib-Semantik
pub struct RingBuffer {
    rb: HeapRb<f32>,
}

impl RingBuffer {
    /// Erstellt einen leeren Ring-Buffer
    ///
    /// Eine Kapazitaet von 0 wird auf 1 angehoben.
    pub fn new(capacity: usize) -> Self {
        Self {
            rb: HeapRb::new(capacity.max(1)),
        }
    }

    /// Schreibt Samples in Reihenfolge.
    ///
    /// Blockiert und scheitert nie. Gibt die Anzahl der dabei verworfenen
    /// (ungelesenen oder nie gespeicherten) Samples zurueck.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let cap = self.capacity();

        // Von einem ueberlangen Block passen nur die letzten `cap` Samples
        let (samples, abgeschnitten) = if samples.len() > cap {
            (&samples[samples.len() - cap..], samples.len() - cap)
        } else {
            (samples, 0)
        };

        let frei = self.rb.vacant_len();
        let verdraengt = if samples.len() > frei {
            self.rb.skip(samples.len() - frei)
        } else {
            0
        };

        self.rb.push_slice(samples);
        abgeschnitten + verdraengt
    }

    /// Liest genau `n` Samples, falls vorhanden.
    ///
    /// Bei weniger als `n` verfuegbaren Samples wird `None` zurueckgegeben
    /// und nichts konsumiert.
    pub fn pop(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.size() < n {
            return None;
        }
        let mut out = vec![0.0; n];
        self.rb.pop_slice(&mut out);
        Some(out)
    }

    /// Wie [`RingBuffer::pop`], schreibt aber in einen vorhandenen Puffer.
    ///
    /// Allokationsfrei, fuer den Render-Callback gedacht.
    pub fn pop_into(&mut self, out: &mut [f32]) -> bool {
        if self.size() < out.len() {
            return false;
        }
        self.rb.pop_slice(out);
        true
    }

    /// Anzahl ungelesener Samples
    pub fn size(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    /// Verwirft alle ungelesenen Samples
    pub fn clear(&mut self) {
        self.rb.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folge(von: usize, bis: usize) -> Vec<f32> {
        (von..bis).map(|i| i as f32).collect()
    }

    #[test]
    fn push_pop_gleiche_anzahl() {
        let mut rb = RingBuffer::new(16);
        let samples = folge(0, 10);
        assert_eq!(rb.push(&samples), 0);
        assert_eq!(rb.pop(10), Some(samples));
        assert!(rb.is_empty());
    }

    #[test]
    fn push_pop_bis_zur_kapazitaet() {
        let mut rb = RingBuffer::new(8);
        let samples = folge(0, 8);
        rb.push(&samples);
        assert_eq!(rb.size(), 8);
        assert_eq!(rb.pop(8), Some(samples));
    }

    #[test]
    fn ueberlauf_behaelt_neueste_samples() {
        let cap = 8;
        for k in 1..=20 {
            let mut rb = RingBuffer::new(cap);
            let samples = folge(0, cap + k);
            assert_eq!(rb.push(&samples), k);
            assert_eq!(rb.pop(cap), Some(folge(k, cap + k)));
        }
    }

    #[test]
    fn ueberlauf_in_mehreren_bloecken() {
        let mut rb = RingBuffer::new(6);
        rb.push(&folge(0, 4));
        assert_eq!(rb.push(&folge(4, 9)), 3);
        assert_eq!(rb.size(), 6);
        assert_eq!(rb.pop(6), Some(folge(3, 9)));
    }

    #[test]
    fn kein_teilweises_lesen() {
        let mut rb = RingBuffer::new(16);
        rb.push(&folge(0, 5));
        assert_eq!(rb.pop(6), None);
        assert_eq!(rb.size(), 5);

        let mut puffer = [9.0f32; 6];
        assert!(!rb.pop_into(&mut puffer));
        assert_eq!(puffer, [9.0; 6]);
        assert_eq!(rb.size(), 5);

        assert_eq!(rb.pop(5), Some(folge(0, 5)));
    }

    #[test]
    fn reihenfolge_ueber_umlauf() {
        let mut rb = RingBuffer::new(4);
        rb.push(&[1.0, 2.0, 3.0]);
        assert_eq!(rb.pop(2), Some(vec![1.0, 2.0]));
        rb.push(&[4.0, 5.0, 6.0]);
        assert_eq!(rb.pop(4), Some(vec![3.0, 4.0, 5.0, 6.0]));
    }

    #[test]
    fn null_kapazitaet_wird_angehoben() {
        let rb = RingBuffer::new(0);
        assert_eq!(rb.capacity(), 1);
    }
}
